// ── vaultchat Atoms: Constants ─────────────────────────────────────────────
// Named constants for ranking, lorebook policy and prompt assembly.

// ── BM25 parameters ────────────────────────────────────────────────────────
// Term-frequency saturation and length normalization.
pub const BM25_K1: f64 = 1.5;
pub const BM25_B: f64 = 0.75;

/// Scored (non always-active) documents below this are never returned.
pub const MIN_RELEVANCE: f64 = 0.3;

// ── Tokenizer ──────────────────────────────────────────────────────────────
/// Minimum token length, counted in chars.
pub const MIN_TOKEN_CHARS: usize = 2;

// ── Lorebook policy ────────────────────────────────────────────────────────
/// Hard cap on activated entries per turn, regardless of how many score.
pub const MAX_LOREBOOK_ENTRIES: usize = 5;

/// Only this many leading chars of an entry's content are indexed.
pub const LOREBOOK_CONTENT_SCAN_CHARS: usize = 200;

/// Default number of trailing messages scanned for lorebook keywords.
pub const DEFAULT_SCAN_DEPTH: usize = 4;

// ── Memory recall ──────────────────────────────────────────────────────────
pub const DEFAULT_MEMORY_LIMIT: usize = 5;

// ── Sampling defaults ──────────────────────────────────────────────────────
pub const DEFAULT_TEMPERATURE: f64 = 0.8;
pub const DEFAULT_TOP_P: f64 = 0.95;
/// Extraction wants stable JSON, not prose.
pub const EXTRACTION_TEMPERATURE: f64 = 0.2;
/// Importance given to extracted items that omit it.
pub const DEFAULT_IMPORTANCE: f64 = 0.5;

// ── HTTP ───────────────────────────────────────────────────────────────────
pub const CONNECT_TIMEOUT_SECS: u64 = 10;
/// Whole-request timeout; streams for long replies can run for minutes.
pub const REQUEST_TIMEOUT_SECS: u64 = 300;

// ── Vault layout ───────────────────────────────────────────────────────────
pub const CHARACTERS_FOLDER: &str = "characters";
pub const DEFAULT_SHARED_LOREBOOK_FOLDER: &str = "lorebooks";
pub const CHARACTER_FILE: &str = "character.json";
pub const MEMORIES_FILE: &str = "memories.json";
pub const DIALOGUE_FILE: &str = "dialogue.json";
