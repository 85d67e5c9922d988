use std::fs::File;
use std::hash::Hasher as _;
use std::io::{self, Read};
use std::path::Path;
use twox_hash::XxHash64;

/// Bytes read from the head of each file.
pub const FINGERPRINT_PREFIX_LEN: usize = 64 * 1024;

/// Content signature for change and duplicate detection: the file size plus
/// an XxHash64 of the leading bytes.
///
/// This is an approximation. Two files of equal size sharing their first
/// 64 KiB collide, and edits past that prefix that keep the size go
/// unnoticed. Reading whole files is not worth it for a catalog of large
/// documents.
pub fn fingerprint(path: &Path, size: u64) -> io::Result<String> {
    let data = read_portion(path)?;
    Ok(format_fingerprint(size, hash_data(&data)))
}

pub fn format_fingerprint(size: u64, hash: u64) -> String {
    format!("{}-{:016x}", size, hash)
}

fn read_portion(path: &Path) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut buffer = Vec::with_capacity(FINGERPRINT_PREFIX_LEN);
    file.take(FINGERPRINT_PREFIX_LEN as u64)
        .read_to_end(&mut buffer)?;
    Ok(buffer)
}

pub fn hash_data(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}
