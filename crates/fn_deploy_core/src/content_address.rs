use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{DeployError, Result};

const READ_BUFFER_BYTES: usize = 64 * 1024;

/// Lowercase hex SHA-256 of the file at `path`, streamed in fixed chunks.
pub fn content_digest(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|error| DeployError::io("opening", path, error))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_BYTES];

    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|error| DeployError::io("hashing", path, error))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn bytes_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
