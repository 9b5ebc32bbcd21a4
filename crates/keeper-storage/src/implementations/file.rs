//! File-based storage backend.
//!
//! Every key is one JSON file under the base directory. Keys are escaped
//! reversibly into file names so the namespace can be listed back.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

const EXTENSION: &str = "json";

/// File-based storage implementation.
///
/// Writes go through a temporary file followed by a rename, so a reader
/// never observes a half-written record.
pub struct FileStorage {
	/// Base directory path for storing files.
	base_path: PathBuf,
}

impl FileStorage {
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	fn get_file_path(&self, key: &str) -> PathBuf {
		self.base_path
			.join(format!("{}.{}", encode_key(key), EXTENSION))
	}
}

/// Escapes the characters that are unsafe or ambiguous in file names.
fn encode_key(key: &str) -> String {
	let mut out = String::with_capacity(key.len());
	for c in key.chars() {
		match c {
			'%' => out.push_str("%25"),
			'/' => out.push_str("%2F"),
			'\\' => out.push_str("%5C"),
			':' => out.push_str("%3A"),
			_ => out.push(c),
		}
	}
	out
}

fn decode_key(name: &str) -> Option<String> {
	let mut out = String::with_capacity(name.len());
	let mut rest = name;
	while let Some(pos) = rest.find('%') {
		out.push_str(&rest[..pos]);
		let code = rest.get(pos + 1..pos + 3)?;
		out.push(match code {
			"25" => '%',
			"2F" => '/',
			"5C" => '\\',
			"3A" => ':',
			_ => return None,
		});
		rest = &rest[pos + 3..];
	}
	out.push_str(rest);
	Some(out)
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let path = self.get_file_path(key);

		match fs::read(&path).await {
			Ok(data) => Ok(data),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		fs::create_dir_all(&self.base_path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, value)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		match fs::remove_file(&path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let path = self.get_file_path(key);
		fs::try_exists(&path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let mut entries = match fs::read_dir(&self.base_path).await {
			Ok(entries) => entries,
			// Nothing written yet.
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let mut keys = Vec::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let path = entry.path();
			if path.extension() != Some(std::ffi::OsStr::new(EXTENSION)) {
				continue;
			}
			let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
				continue;
			};
			match decode_key(stem) {
				Some(key) if key.starts_with(prefix) => keys.push(key),
				Some(_) => {},
				None => tracing::debug!("Skipping file {:?}: not a storage key", path),
			}
		}

		keys.sort();
		Ok(keys)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for file storage (default: "./data/storage")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	let storage_path = match config.get("storage_path") {
		None => "./data/storage",
		Some(value) => value.as_str().ok_or_else(|| {
			StorageError::Configuration("storage_path must be a string".to_string())
		})?,
	};

	if storage_path.trim().is_empty() {
		return Err(StorageError::Configuration(
			"storage_path cannot be empty".to_string(),
		));
	}

	Ok(Box::new(FileStorage::new(PathBuf::from(storage_path))))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl keeper_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = crate::StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl crate::StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_key_escaping_is_reversible() {
		for key in ["runs:abc:epoch:pool/1", "reports:100%", "plain"] {
			let encoded = encode_key(key);
			assert!(!encoded.contains('/'));
			assert!(!encoded.contains(':'));
			assert_eq!(decode_key(&encoded).as_deref(), Some(key));
		}
		assert_eq!(decode_key("bad%ZZ"), None);
	}

	#[tokio::test]
	async fn test_basic_operations() {
		let temp_dir = TempDir::new().unwrap();
		let storage = FileStorage::new(temp_dir.path().to_path_buf());

		let key = "counters:pool-1";
		storage.set_bytes(key, b"7".to_vec()).await.unwrap();
		assert_eq!(storage.get_bytes(key).await.unwrap(), b"7".to_vec());
		assert!(storage.exists(key).await.unwrap());

		storage.set_bytes(key, b"8".to_vec()).await.unwrap();
		assert_eq!(storage.get_bytes(key).await.unwrap(), b"8".to_vec());

		storage.delete(key).await.unwrap();
		assert!(!storage.exists(key).await.unwrap());
		assert!(matches!(
			storage.get_bytes(key).await,
			Err(StorageError::NotFound)
		));
		// Deleting twice is fine.
		storage.delete(key).await.unwrap();
	}

	#[tokio::test]
	async fn test_list_keys() {
		let temp_dir = TempDir::new().unwrap();
		let storage = FileStorage::new(temp_dir.path().join("nested"));

		assert!(storage.list_keys("resources:").await.unwrap().is_empty());

		for key in ["resources:b", "resources:a", "counters:a"] {
			storage.set_bytes(key, b"{}".to_vec()).await.unwrap();
		}
		std::fs::write(temp_dir.path().join("nested").join("stray.txt"), "x").unwrap();

		let keys = storage.list_keys("resources:").await.unwrap();
		assert_eq!(keys, vec!["resources:a".to_string(), "resources:b".to_string()]);
	}

	#[test]
	fn test_factory_rejects_bad_path() {
		let config: toml::Value = toml::from_str("storage_path = 5").unwrap();
		assert!(matches!(
			create_storage(&config),
			Err(StorageError::Configuration(_))
		));

		let config: toml::Value = toml::from_str("storage_path = \"  \"").unwrap();
		assert!(create_storage(&config).is_err());
	}
}
