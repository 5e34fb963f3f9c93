//! Chunker integration tests over realistic lesson documents

use docent::chunker::{split, Chunker, DataType, Document, MAX_CHUNK_BYTES};

fn non_whitespace(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

fn fence_count(text: &str) -> usize {
    text.lines().filter(|l| l.trim_start().starts_with("```")).count()
}

fn is_heading(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

fn lesson_with_code() -> (String, String) {
    let mut doc = String::from("# Sorting Algorithms\n\n");
    for i in 0..12 {
        doc.push_str(&format!(
            "Sorting lesson paragraph {} explains how comparison sorts order elements step by step.\n\n",
            i
        ));
    }

    doc.push_str("## Reference Implementation\n");
    let mut fence = String::from("```rust\n");
    for i in 0..200 {
        fence.push_str(&format!("    let value_{:03} = compute({});\n", i, i));
    }
    fence.push_str("```");
    doc.push_str(&fence);
    doc.push_str("\n\n## Exercises\n\n");

    let mut i = 0;
    while doc.chars().count() < 10_000 {
        doc.push_str(&format!(
            "Exercise {} asks students to trace the algorithm on a small array by hand.\n",
            i
        ));
        i += 1;
    }
    (doc, fence)
}

#[test]
fn test_code_fence_stays_in_one_chunk() {
    let (doc, fence) = lesson_with_code();
    assert!(doc.chars().count() >= 10_000);

    let chunks = split(&doc, 3000);
    println!("✓ {} chunks from {} bytes", chunks.len(), doc.len());

    let holders: Vec<&String> = chunks.iter().filter(|c| c.contains("```rust")).collect();
    assert_eq!(holders.len(), 1);
    assert!(holders[0].contains(&fence));
    assert!(holders[0].contains("## Reference Implementation\n```rust"));

    for chunk in &chunks {
        assert!(chunk.len() <= MAX_CHUNK_BYTES);
        assert_eq!(fence_count(chunk) % 2, 0, "unterminated fence in:\n{}", chunk);
        let last = chunk.lines().rev().find(|l| !l.trim().is_empty()).unwrap();
        assert!(!is_heading(last), "chunk ends with a heading:\n{}", chunk);
    }

    let total: usize = chunks.iter().map(|c| non_whitespace(c)).sum();
    assert!(total >= non_whitespace(&doc));
}

#[test]
fn test_headings_keep_their_content() {
    let mut doc = String::new();
    for section in 0..6 {
        doc.push_str(&format!("## Topic {}\n### Subtopic {}\n", section, section));
        for line in 0..40 {
            doc.push_str(&format!(
                "Topic {} note {} about cell membranes and transport.\n",
                section, line
            ));
        }
    }

    let chunks = split(&doc, 1000);
    assert!(chunks.len() > 1);
    for chunk in &chunks {
        let last = chunk.lines().rev().find(|l| !l.trim().is_empty()).unwrap();
        assert!(!is_heading(last), "dangling heading in:\n{}", chunk);
        assert!(chunk.len() <= MAX_CHUNK_BYTES);
    }
    for section in 0..6 {
        let heading = format!("## Topic {}\n### Subtopic {}", section, section);
        assert!(chunks.iter().any(|c| c.contains(&heading)));
    }
}

#[test]
fn test_tables_lists_and_long_lines() {
    let mut doc = String::from("# Periodic Table\n\n");
    doc.push_str("| Element | Symbol | Number |\n|---|---|---|\n");
    for i in 0..60 {
        doc.push_str(&format!("| Element{} | E{} | {} |\n", i, i, i));
    }
    doc.push('\n');
    for i in 0..30 {
        doc.push_str(&format!("- Fact {} about chemical bonds\n  with a continuation line\n", i));
    }
    doc.push('\n');
    doc.push_str(&"electron ".repeat(1200));
    doc.push('\n');

    let chunks = split(&doc, 800);

    for chunk in &chunks {
        assert!(chunk.len() <= MAX_CHUNK_BYTES);
        for line in chunk.lines().filter(|l| l.starts_with('|')) {
            assert!(line.ends_with('|'), "table row was split: {}", line);
        }
    }
    for i in 0..30 {
        let item = format!("- Fact {} about chemical bonds\n  with a continuation line", i);
        assert!(chunks.iter().any(|c| c.contains(&item)), "list item {} split", i);
    }
    let total: usize = chunks.iter().map(|c| non_whitespace(c)).sum();
    assert!(total >= non_whitespace(&doc));
}

#[test]
fn test_oversized_fence_is_reopened() {
    let mut doc = String::from("```python\n");
    for i in 0..900 {
        doc.push_str(&format!("print('line {}')\n", i));
    }
    doc.push_str("```\n");

    let chunks = split(&doc, 3000);
    assert!(chunks.len() > 1);
    for chunk in &chunks {
        assert!(chunk.len() <= MAX_CHUNK_BYTES);
        assert_eq!(fence_count(chunk) % 2, 0);
    }
    assert!(chunks[1].starts_with("```python"));
}

#[test]
fn test_empty_document() {
    assert!(split("", 3000).is_empty());
    assert!(split("\n\n   \n", 3000).is_empty());
}

#[test]
fn test_chunk_document_stamps_provenance() {
    let (doc, _) = lesson_with_code();
    let document = Document {
        text: doc,
        source_file_name: "sorting.md".to_string(),
        category: "cs".to_string(),
        knowledge_base_id: "kb-cs".to_string(),
        data_type: DataType::Unstructured,
    };

    let chunks = Chunker::default().chunk_document(&document);
    assert!(!chunks.is_empty());
    assert!(chunks.iter().all(|c| c.file_name == "sorting.md"));
    assert!(chunks.iter().all(|c| c.knowledge_base_id == "kb-cs"));
    assert!(chunks.iter().any(|c| c.has_code));
    for (i, chunk) in chunks.iter().enumerate() {
        assert!(chunk.id.starts_with(&format!("sorting.md_{}_", i)));
    }

    let structured = Document {
        text: "name,grade\nAda,A\n\nGrace,A\n".to_string(),
        data_type: DataType::Structured,
        ..document
    };
    let rows = Chunker::default().chunk_document(&structured);
    let texts: Vec<&str> = rows.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, vec!["name,grade", "Ada,A", "Grace,A"]);
    assert!(rows.iter().all(|c| c.data_type == DataType::Structured));
}
