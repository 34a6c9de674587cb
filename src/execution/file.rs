//! Splitting oversized call data into network files and pricing the upload.

/// Fee schedule in US cents for the file operations of an upload.
pub const FILE_CREATE_PER_5_KB_CENTS: f64 = 9.51;
pub const FILE_APPEND_PER_5_KB_CENTS: f64 = 9.55;
pub const FILE_APPEND_BASE_FEE_CENTS: f64 = 3.93;
pub const FILE_APPEND_RATE_PER_BYTE_CENTS: f64 = 0.0011;

pub const TINYBARS_PER_HBAR: f64 = 100_000_000.0;

/// Hex-encoded call data cut into one create chunk and zero or more appends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunkPlan {
    contents: String,
    chunk_size: usize,
}

impl FileChunkPlan {
    /// Hex-encode `call_data` and plan chunks of `chunk_size` characters.
    pub fn new(call_data: &[u8], chunk_size: usize) -> Self {
        Self {
            contents: hex::encode(call_data),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Length of the hex-encoded payload.
    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Contents of the create transaction.
    pub fn first_chunk(&self) -> &str {
        &self.contents[..self.contents.len().min(self.chunk_size)]
    }

    /// Contents of each append transaction, in order.
    pub fn append_chunks(&self) -> impl Iterator<Item = &str> {
        let start = self.contents.len().min(self.chunk_size);
        // Hex is ASCII, so byte offsets are char boundaries.
        self.contents[start..]
            .as_bytes()
            .chunks(self.chunk_size)
            .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
    }

    /// Number of append transactions needed.
    pub fn append_count(&self) -> usize {
        self.contents.len().saturating_sub(self.chunk_size).div_ceil(self.chunk_size)
    }
}

/// Estimate the tinybar cost of uploading `call_data_size` characters in
/// `chunk_size` pieces at `cents_per_hbar`.
///
/// One create is charged at the full-chunk rate, `floor(size / chunk) - 1`
/// appends at the per-chunk rate and the trailing partial chunk pro rata.
pub fn estimate_file_transactions_fee(call_data_size: usize, chunk_size: usize, cents_per_hbar: f64) -> u64 {
    if cents_per_hbar <= 0.0 {
        return 0;
    }
    let chunk_size = chunk_size.max(1);
    let full_appends = (call_data_size / chunk_size).saturating_sub(1);
    let last_chunk_size = call_data_size % chunk_size;

    let last_chunk_cents = FILE_APPEND_BASE_FEE_CENTS + last_chunk_size as f64 * FILE_APPEND_RATE_PER_BYTE_CENTS;
    let total_cents =
        FILE_CREATE_PER_5_KB_CENTS + FILE_APPEND_PER_5_KB_CENTS * full_appends as f64 + last_chunk_cents;

    (total_cents / cents_per_hbar * TINYBARS_PER_HBAR).round() as u64
}
