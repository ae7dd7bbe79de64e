//! The model manifest: which ONNX files rollcall runs, where they come
//! from, and how to prove the bytes on disk are the ones we expect.
//!
//! The daemon verifies against this table at startup and `rollcall setup`
//! downloads from it, so the two can never disagree about which files
//! and digests are current.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// SCRFD face detection model filename.
pub const DETECTOR_MODEL: &str = "det_10g.onnx";
/// ArcFace embedding model filename.
pub const EMBEDDER_MODEL: &str = "w600k_r50.onnx";

/// One entry in the model manifest.
pub struct ModelFile {
    pub name: &'static str,
    pub url: &'static str,
    pub sha256: &'static str,
    pub size_display: &'static str,
}

// Digests match the `oid sha256:` field of the upstream Git LFS pointers:
// https://huggingface.co/public-data/insightface/raw/main/models/buffalo_l/
pub const MODELS: &[ModelFile] = &[
    ModelFile {
        name: DETECTOR_MODEL,
        url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/det_10g.onnx",
        sha256: "5838f7fe053675b1c7a08b633df49e7af5495cee0493c7dcf6697200b85b5b91",
        size_display: "16 MB",
    },
    ModelFile {
        name: EMBEDDER_MODEL,
        url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/w600k_r50.onnx",
        sha256: "4c06341c33c2ca1f86781dab0e829f88ad5b64be9fba56e56bc9ebdefc619e43",
        size_display: "166 MB",
    },
];

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("model {name} not found at {}", path.display())]
    NotFound { name: &'static str, path: PathBuf },

    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("model {name} does not match its manifest digest (expected {expected}, got {actual})")]
    Digest {
        name: &'static str,
        expected: &'static str,
        actual: String,
    },
}

impl ModelFile {
    /// Where this model lives inside a model directory.
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.name)
    }

    /// Check that the file exists under `dir` and hashes to the manifest digest.
    pub fn verify_in(&self, dir: &Path) -> Result<(), IntegrityError> {
        let path = self.path_in(dir);
        if !path.is_file() {
            return Err(IntegrityError::NotFound {
                name: self.name,
                path,
            });
        }

        let actual = sha256_file_hex(&path)?;
        if actual != self.sha256 {
            return Err(IntegrityError::Digest {
                name: self.name,
                expected: self.sha256,
                actual,
            });
        }

        Ok(())
    }
}

/// SHA-256 digest of a file's contents, as lowercase hex.
pub fn sha256_file_hex(path: &Path) -> Result<String, IntegrityError> {
    let io_err = |source| IntegrityError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    io::copy(&mut BufReader::new(file), &mut hasher).map_err(io_err)?;

    Ok(format!("{:x}", hasher.finalize()))
}

/// Verify every manifest entry under `model_dir`, stopping at the first failure.
pub fn verify_models_dir(model_dir: &Path) -> Result<(), IntegrityError> {
    MODELS.iter().try_for_each(|model| model.verify_in(model_dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(label: &str) -> PathBuf {
        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("rollcall-manifest-{label}-{stamp}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn digest_matches_known_vector() {
        let dir = scratch("vector");
        let path = dir.join("abc.bin");
        std::fs::write(&path, b"abc").unwrap();

        let digest = sha256_file_hex(&path).unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn verify_in_reports_absent_file() {
        let dir = scratch("absent");

        let err = MODELS[0].verify_in(&dir).unwrap_err();
        assert!(matches!(err, IntegrityError::NotFound { name, .. } if name == DETECTOR_MODEL));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn verify_in_reports_wrong_content() {
        let dir = scratch("corrupt");
        std::fs::write(dir.join(DETECTOR_MODEL), b"definitely not an onnx graph").unwrap();

        match MODELS[0].verify_in(&dir).unwrap_err() {
            IntegrityError::Digest { name, actual, .. } => {
                assert_eq!(name, DETECTOR_MODEL);
                assert_eq!(actual.len(), 64);
            }
            other => panic!("unexpected error: {other}"),
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn verify_models_dir_stops_at_first_gap() {
        let dir = scratch("first-gap");

        let err = verify_models_dir(&dir).unwrap_err();
        assert!(matches!(err, IntegrityError::NotFound { name, .. } if name == DETECTOR_MODEL));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn manifest_is_well_formed() {
        assert_eq!(MODELS.len(), 2);
        assert_ne!(DETECTOR_MODEL, EMBEDDER_MODEL);

        for model in MODELS {
            assert_eq!(model.sha256.len(), 64);
            assert!(model.sha256.chars().all(|c| c.is_ascii_hexdigit()));
            assert!(model.url.ends_with(model.name));
        }
    }
}
