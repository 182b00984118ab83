use finrag_retrieval::{ContextResponse, SearchResponse, StoreStats};
use finrag_vector_store::Document;
use std::fmt::Write as _;

const SNIPPET_CHARS: usize = 160;

pub fn render_search(response: &SearchResponse) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Found {} results for '{}' (confidence {:.3})",
        response.total_found, response.query, response.confidence
    );
    for (rank, result) in response.results.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>2}. {}  score {:.3}",
            rank + 1,
            document_label(&result.document),
            result.similarity_score
        );
        let _ = writeln!(out, "    {}", truncate_one_line(&result.document.content, SNIPPET_CHARS));
    }
    out
}

pub fn render_context(response: &ContextResponse) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} documents (confidence {:.3})",
        response.total_documents, response.confidence
    );
    for (bucket, documents) in &response.context {
        let _ = writeln!(out, "\n[{bucket}] {}", documents.len());
        for document in documents {
            let _ = writeln!(
                out,
                "  - {}: {}",
                document_label(document),
                truncate_one_line(&document.content, SNIPPET_CHARS)
            );
        }
    }
    out
}

pub fn render_stats(stats: &StoreStats) -> String {
    format!(
        "Documents: {}\nIndex size: {}\nDimension: {}\nBackend: {}\n",
        stats.total_documents, stats.index_size, stats.dimension, stats.backend
    )
}

pub fn render_add(success: bool, documents_added: usize) -> String {
    if success {
        format!("Added {documents_added} documents\n")
    } else {
        "No documents were added (see log for the cause)\n".to_string()
    }
}

fn document_label(document: &Document) -> String {
    match &document.ticker {
        Some(ticker) => format!("#{} [{}] {ticker}", document.id, document.doc_type),
        None => format!("#{} [{}]", document.id, document.doc_type),
    }
}

fn truncate_one_line(text: &str, max_chars: usize) -> String {
    let line: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.chars().count() <= max_chars {
        return line;
    }
    let mut cut: String = line.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
