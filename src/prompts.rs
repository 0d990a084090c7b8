//! Instruction payload sent with every extraction request.
//!
//! Centralising the prompt here serves two purposes:
//!
//! 1. **Single source of truth** — tightening a field definition or adding a
//!    rule requires editing exactly one place.
//!
//! 2. **Testability** — unit tests can inspect the prompt directly without a
//!    live API, so prompt regressions are caught like any other regression.
//!
//! Callers can override via [`crate::config::ExtractionConfig::extraction_prompt`];
//! the constant here is used only when no override is provided.

/// Default instruction for extracting contact/ownership records from a set
/// of scanned page images.
///
/// The pages of one request are consecutive and in order — the prompt leans
/// on that so tables spanning a page boundary are read as one table.
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"You are an expert at reading scanned property and business documents. The attached images are consecutive pages of one document, in page order. Extract every contact and ownership record you can see.

Follow these rules precisely:

1. WHAT COUNTS AS A RECORD
   - Every person or company listed as an owner, contact, registrant, or party
   - One JSON object per distinct person or company
   - Tables often continue across page boundaries; treat a table that ends at
     the bottom of one page and resumes at the top of the next as ONE table

2. FIELDS
   - "name": full personal name, if present
   - "company": company or organisation name, if present
   - "address", "city", "state", "zip": postal address components as printed
   - "ownership_percentage": ownership share if stated (keep the printed form)
   - "document_section": the heading or table caption the record appears under
   - Omit a field entirely rather than guessing or writing "unknown"

3. FIDELITY
   - Transcribe names and addresses exactly as printed, including suffixes
   - Do not merge two people who share an address into one record
   - Do not invent records for illegible regions

4. OUTPUT FORMAT
   - Output ONLY a JSON array of record objects
   - Output [] if no records are visible
   - Do NOT wrap the array in markdown fences
   - Do NOT add commentary, keys outside the array, or trailing text"#;
