//! .wpk package packing, unpacking, and content hashing.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::manifest::ModuleManifest;
use crate::signing::{Signature, SigningKey, VerifyingKey};
use crate::PackageError;

pub const MANIFEST_ENTRY: &str = "manifest.toml";
pub const README_ENTRY: &str = "README.md";
pub const SIGNATURE_ENTRY: &str = "signature.bin";
pub const SIGNER_ENTRY: &str = "signer.pub";

/// A single file entry inside a .wpk package.
#[derive(Debug, Clone)]
pub struct PackageEntry {
    pub name: String,
    pub data: Vec<u8>,
}

/// An opened .wpk package with parsed contents.
pub struct PluginPackage {
    pub manifest: ModuleManifest,
    pub readme: Option<Vec<u8>>,
    /// Any other entries, keyed by archive path.
    pub files: BTreeMap<String, Vec<u8>>,
    pub signature: Option<Vec<u8>>,
    /// Raw public key bytes of the author that signed the package.
    pub signer: Option<Vec<u8>>,
    entries: Vec<PackageEntry>,
}

impl PluginPackage {
    /// Opens and parses a .wpk package from a reader.
    pub fn open<R: Read + Seek>(reader: R) -> Result<Self, PackageError> {
        let mut archive = ZipArchive::new(reader)?;
        let mut manifest_bytes = None;
        let mut readme = None;
        let mut signature = None;
        let mut signer = None;
        let mut files = BTreeMap::new();
        let mut entries = Vec::new();

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut data = Vec::new();
            file.read_to_end(&mut data)?;

            match name.as_str() {
                MANIFEST_ENTRY => manifest_bytes = Some(data.clone()),
                README_ENTRY => readme = Some(data.clone()),
                SIGNATURE_ENTRY => signature = Some(data.clone()),
                SIGNER_ENTRY => signer = Some(data.clone()),
                _ => {
                    files.insert(name.clone(), data.clone());
                }
            }
            entries.push(PackageEntry { name, data });
        }

        let manifest_bytes =
            manifest_bytes.ok_or_else(|| PackageError::MissingEntry(MANIFEST_ENTRY.into()))?;
        let manifest: ModuleManifest = toml::from_str(
            std::str::from_utf8(&manifest_bytes)
                .map_err(|e| PackageError::ManifestInvalid(e.to_string()))?,
        )?;
        manifest.validate()?;

        Ok(Self {
            manifest,
            readme,
            files,
            signature,
            signer,
            entries,
        })
    }

    /// Opens a package file from disk.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, PackageError> {
        let file = File::open(path)?;
        Self::open(BufReader::new(file))
    }

    /// Every entry in archive order, including signature files.
    pub fn entries(&self) -> &[PackageEntry] {
        &self.entries
    }

    /// Deterministic SHA-256 over all entries except the signature and
    /// signer key, sorted by name.
    pub fn content_hash(&self) -> String {
        hash_entries(self.entries.iter())
    }

    /// Verifies the package signature against the content hash.
    pub fn verify(&self, key: &VerifyingKey) -> Result<(), PackageError> {
        let sig_bytes = self.signature.as_ref().ok_or(PackageError::NotSigned)?;
        let sig_array: [u8; 64] = sig_bytes
            .as_slice()
            .try_into()
            .map_err(|_| PackageError::SignatureInvalid)?;
        let signature = Signature::from_bytes(&sig_array);
        let hash = self.content_hash();
        key.verify(hash.as_bytes(), &signature)
    }

    /// The signer key embedded in the package, if any.
    pub fn embedded_signer(&self) -> Result<Option<VerifyingKey>, PackageError> {
        let Some(bytes) = self.signer.as_ref() else {
            return Ok(None);
        };
        let array: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| PackageError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&array).map(Some)
    }

    /// Verifies the signature with the embedded signer key and returns it.
    pub fn verify_embedded(&self) -> Result<VerifyingKey, PackageError> {
        let key = self.embedded_signer()?.ok_or(PackageError::NotSigned)?;
        self.verify(&key)?;
        Ok(key)
    }
}

fn hash_entries<'a>(entries: impl Iterator<Item = &'a PackageEntry>) -> String {
    let mut sorted: Vec<_> = entries
        .filter(|e| e.name != SIGNATURE_ENTRY && e.name != SIGNER_ENTRY)
        .collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut hasher = Sha256::new();
    for entry in sorted {
        hasher.update(entry.name.as_bytes());
        hasher.update((entry.data.len() as u64).to_le_bytes());
        hasher.update(&entry.data);
    }
    hex::encode(hasher.finalize())
}

/// Fluent builder for creating .wpk packages.
pub struct PackageBuilder {
    manifest: ModuleManifest,
    readme: Option<Vec<u8>>,
    files: BTreeMap<String, Vec<u8>>,
    signing_key: Option<SigningKey>,
}

impl PackageBuilder {
    pub fn new(manifest: ModuleManifest) -> Self {
        Self {
            manifest,
            readme: None,
            files: BTreeMap::new(),
            signing_key: None,
        }
    }

    pub fn readme(mut self, data: Vec<u8>) -> Self {
        self.readme = Some(data);
        self
    }

    pub fn add_file(mut self, name: &str, data: Vec<u8>) -> Self {
        self.files.insert(name.to_string(), data);
        self
    }

    /// Signs the package and embeds the matching public key.
    pub fn sign(mut self, key: &SigningKey) -> Self {
        self.signing_key = Some(SigningKey::from_bytes(&key.to_bytes()));
        self
    }

    /// Builds the .wpk zip archive and returns the raw bytes.
    pub fn build(self) -> Result<Vec<u8>, PackageError> {
        self.manifest.validate()?;

        for name in self.files.keys() {
            if matches!(
                name.as_str(),
                MANIFEST_ENTRY | README_ENTRY | SIGNATURE_ENTRY | SIGNER_ENTRY
            ) {
                return Err(PackageError::ManifestInvalid(format!(
                    "'{name}' is a reserved entry name"
                )));
            }
        }

        let manifest_toml = toml::to_string_pretty(&self.manifest)?;
        let mut entries = vec![PackageEntry {
            name: MANIFEST_ENTRY.into(),
            data: manifest_toml.into_bytes(),
        }];
        if let Some(readme) = self.readme {
            entries.push(PackageEntry {
                name: README_ENTRY.into(),
                data: readme,
            });
        }
        for (name, data) in self.files {
            entries.push(PackageEntry { name, data });
        }

        if let Some(ref signing_key) = self.signing_key {
            let hash = hash_entries(entries.iter());
            let sig = signing_key.sign(hash.as_bytes());
            entries.push(PackageEntry {
                name: SIGNATURE_ENTRY.into(),
                data: sig.to_bytes().to_vec(),
            });
            entries.push(PackageEntry {
                name: SIGNER_ENTRY.into(),
                data: signing_key.verifying_key().to_bytes().to_vec(),
            });
        }

        let buf = std::io::Cursor::new(Vec::new());
        let mut zip = ZipWriter::new(buf);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for entry in &entries {
            zip.start_file(entry.name.as_str(), options)?;
            zip.write_all(&entry.data)?;
        }
        let finished = zip.finish()?;
        Ok(finished.into_inner())
    }

    /// Builds and writes the package to `path`.
    pub fn write_to(self, path: impl AsRef<Path>) -> Result<(), PackageError> {
        let bytes = self.build()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{PluginManifest, RuleManifest};
    use std::io::Cursor;
    use warden_types::{Confidence, Severity};

    fn test_manifest() -> ModuleManifest {
        ModuleManifest {
            host_api_version: 1,
            plugins: vec![PluginManifest {
                id: "warden.test".into(),
                name: "Test".into(),
                version: "1.0.0".into(),
                author: "Warden".into(),
                description: String::new(),
                extensions: vec!["txt".into()],
                host_api_version: None,
                max_file_size: 1024,
                rules: vec![RuleManifest {
                    id: "T1".into(),
                    title: "No tabs".into(),
                    description: String::new(),
                    category: "style".into(),
                    severity: Severity::Warning,
                    enabled_by_default: true,
                    tags: vec![],
                    help_uri: None,
                    pattern: "\t".into(),
                    message: None,
                    confidence: Confidence::High,
                    fix: None,
                }],
            }],
        }
    }

    #[test]
    fn pack_unpack_minimal() {
        let bytes = PackageBuilder::new(test_manifest()).build().unwrap();
        let pkg = PluginPackage::open(Cursor::new(&bytes)).unwrap();
        assert_eq!(pkg.manifest.plugins[0].id, "warden.test");
        assert!(pkg.readme.is_none());
        assert!(pkg.signature.is_none());
        assert!(pkg.embedded_signer().unwrap().is_none());
    }

    #[test]
    fn content_hash_excludes_signature_and_signer() {
        let unsigned = PackageBuilder::new(test_manifest())
            .add_file("data/extra.txt", b"extra".to_vec())
            .build()
            .unwrap();

        let kp = crate::KeyPair::generate();
        let signed = PackageBuilder::new(test_manifest())
            .add_file("data/extra.txt", b"extra".to_vec())
            .sign(&kp.signing_key)
            .build()
            .unwrap();

        let p1 = PluginPackage::open(Cursor::new(&unsigned)).unwrap();
        let p2 = PluginPackage::open(Cursor::new(&signed)).unwrap();
        assert_eq!(p1.content_hash(), p2.content_hash());
        assert!(p2.signature.is_some());
        assert_eq!(p2.verify_embedded().unwrap(), kp.verifying_key);
    }

    #[test]
    fn reserved_file_names_are_rejected() {
        let result = PackageBuilder::new(test_manifest())
            .add_file(SIGNER_ENTRY, vec![0; 32])
            .build();
        assert!(matches!(result, Err(PackageError::ManifestInvalid(_))));
    }

    #[test]
    fn missing_manifest_is_reported() {
        let buf = Cursor::new(Vec::new());
        let mut zip = ZipWriter::new(buf);
        zip.start_file("other.txt", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"x").unwrap();
        let bytes = zip.finish().unwrap().into_inner();

        let result = PluginPackage::open(Cursor::new(&bytes));
        assert!(matches!(result, Err(PackageError::MissingEntry(_))));
    }

    #[test]
    fn write_to_and_open_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("module.wpk");
        PackageBuilder::new(test_manifest()).write_to(&path).unwrap();
        let pkg = PluginPackage::open_path(&path).unwrap();
        assert_eq!(pkg.entries().len(), 1);
    }
}
