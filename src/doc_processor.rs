use std::fs;
use std::path::Path;

/// Characters per chunk.
pub const CHUNK_SIZE: usize = 500;
/// Characters shared by consecutive chunks.
pub const CHUNK_OVERLAP: usize = 50;

/// File extensions the processor can extract text from.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt", "md", "markdown"];

// Preferred break points, strongest first.
const SEPARATORS: &[&str] = &["\n\n", "\n", " "];

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Pdf(String),
    #[error("Unsupported file type: .{0}")]
    Unsupported(String),
}

/// Parsed document content
pub struct ParsedDocument {
    pub content: String,
}

/// Lowercased extension of `path`, empty when there is none.
pub fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

pub fn is_supported(path: &Path) -> bool {
    SUPPORTED_EXTENSIONS.contains(&file_extension(path).as_str())
}

/// Parse a document file into plain text
pub fn parse_file(path: &Path) -> Result<ParsedDocument, DocumentError> {
    let ext = file_extension(path);

    match ext.as_str() {
        "txt" | "md" | "markdown" => Ok(ParsedDocument {
            content: fs::read_to_string(path)?,
        }),
        "pdf" => {
            let bytes = fs::read(path)?;
            // pdf-extract panics on some malformed files instead of returning an error.
            let content = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(&bytes))
                .map_err(|_| DocumentError::Pdf("malformed document".into()))?
                .map_err(|e| DocumentError::Pdf(e.to_string()))?;
            Ok(ParsedDocument { content })
        }
        _ => Err(DocumentError::Unsupported(ext)),
    }
}

/// Split text into overlapping chunks for embedding.
///
/// Windows hold at most `chunk_size` characters. A window that stops short of
/// the end of the text is pulled back to the strongest separator found in its
/// second half, so chunks tend to end on paragraph, line or word boundaries.
/// The next window starts `overlap` characters before the previous end.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() || chunk_size == 0 {
        return vec![];
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let overlap = overlap.min(chunk_size - 1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + chunk_size).min(chars.len());
        if end < chars.len() {
            end = break_point(&chars, start, end);
        }

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        if end >= chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    chunks
}

fn break_point(chars: &[char], start: usize, end: usize) -> usize {
    let floor = start + (end - start) / 2;
    for sep in SEPARATORS {
        let sep: Vec<char> = sep.chars().collect();
        let found = (floor..=end.saturating_sub(sep.len()))
            .rev()
            .find(|&i| chars[i..i + sep.len()] == sep[..]);
        if let Some(i) = found {
            return i + sep.len();
        }
    }
    end
}
