//! Warden plugin module (.wpk) format.
//!
//! A `.wpk` file is a zip archive containing:
//! - `manifest.toml` : module metadata, declared plugins and their rules
//! - `README.md`     : optional documentation
//! - any other files the module ships with
//! - `signature.bin` : Ed25519 detached signature over the content hash
//! - `signer.pub`    : the author's 32-byte public key
//!
//! Signing: the content hash covers all files except `signature.bin` and
//! `signer.pub`. A package is trusted only when the embedded key verifies
//! the signature and is also on the host's trusted signer list.

mod error;
mod manifest;
mod package;
mod signing;

pub use error::PackageError;
pub use manifest::{FixTemplate, ModuleManifest, PluginManifest, RuleManifest};
pub use package::{
    PackageBuilder, PackageEntry, PluginPackage, MANIFEST_ENTRY, README_ENTRY, SIGNATURE_ENTRY,
    SIGNER_ENTRY,
};
pub use signing::{KeyPair, Signature, SigningKey, VerifyingKey};

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use warden_types::{Confidence, Severity};

    fn manifest(id: &str) -> ModuleManifest {
        ModuleManifest {
            host_api_version: 1,
            plugins: vec![PluginManifest {
                id: id.into(),
                name: "Sample".into(),
                version: "0.3.1".into(),
                author: "Warden".into(),
                description: "Finds TODO markers".into(),
                extensions: vec!["rs".into()],
                host_api_version: None,
                max_file_size: 64 * 1024,
                rules: vec![RuleManifest {
                    id: "TODO001".into(),
                    title: "TODO marker".into(),
                    description: String::new(),
                    category: "maintainability".into(),
                    severity: Severity::Info,
                    enabled_by_default: true,
                    tags: vec!["todo".into()],
                    help_uri: None,
                    pattern: r"TODO\((\w+)\)".into(),
                    message: Some("TODO left in code".into()),
                    confidence: Confidence::High,
                    fix: Some(FixTemplate {
                        title: "Convert to issue reference".into(),
                        replacement: "ISSUE($1)".into(),
                        confidence: Confidence::Medium,
                    }),
                }],
            }],
        }
    }

    #[test]
    fn roundtrip_pack_unpack() {
        let readme = b"# Sample\n\nFinds TODOs.";
        let bytes = PackageBuilder::new(manifest("warden.sample"))
            .readme(readme.to_vec())
            .add_file("rules/notes.txt", b"notes".to_vec())
            .build()
            .expect("pack should succeed");

        let pkg = PluginPackage::open(Cursor::new(&bytes)).expect("unpack should succeed");
        assert_eq!(pkg.manifest.plugins[0].id, "warden.sample");
        assert_eq!(pkg.readme.as_deref(), Some(readme.as_slice()));
        assert_eq!(pkg.files.get("rules/notes.txt").map(Vec::as_slice), Some(&b"notes"[..]));
        assert!(pkg.signature.is_none());

        let fix = pkg.manifest.plugins[0].rules[0].fix.as_ref().unwrap();
        assert_eq!(fix.replacement, "ISSUE($1)");
    }

    #[test]
    fn sign_and_verify() {
        let keypair = KeyPair::generate();
        let bytes = PackageBuilder::new(manifest("warden.signed"))
            .sign(&keypair.signing_key)
            .build()
            .expect("pack+sign should succeed");

        let pkg = PluginPackage::open(Cursor::new(&bytes)).expect("unpack should succeed");
        assert!(pkg.signature.is_some());
        assert!(pkg.verify(&keypair.verifying_key).is_ok());
        assert_eq!(pkg.embedded_signer().unwrap(), Some(keypair.verifying_key));
    }

    #[test]
    fn verify_fails_with_wrong_key() {
        let real = KeyPair::generate();
        let wrong = KeyPair::generate();
        let bytes = PackageBuilder::new(manifest("warden.tampered"))
            .sign(&real.signing_key)
            .build()
            .unwrap();

        let pkg = PluginPackage::open(Cursor::new(&bytes)).unwrap();
        assert!(matches!(
            pkg.verify(&wrong.verifying_key),
            Err(PackageError::SignatureInvalid)
        ));
    }

    #[test]
    fn unsigned_package_verify_fails() {
        let bytes = PackageBuilder::new(manifest("warden.unsigned")).build().unwrap();
        let pkg = PluginPackage::open(Cursor::new(&bytes)).unwrap();
        let keypair = KeyPair::generate();
        assert!(matches!(pkg.verify(&keypair.verifying_key), Err(PackageError::NotSigned)));
        assert!(matches!(pkg.verify_embedded(), Err(PackageError::NotSigned)));
    }

    #[test]
    fn content_hash_deterministic() {
        let p1 = PackageBuilder::new(manifest("warden.hash")).build().unwrap();
        let p2 = PackageBuilder::new(manifest("warden.hash")).build().unwrap();
        let p1 = PluginPackage::open(Cursor::new(&p1)).unwrap();
        let p2 = PluginPackage::open(Cursor::new(&p2)).unwrap();
        assert_eq!(p1.content_hash(), p2.content_hash());
    }

    #[test]
    fn content_hash_changes_with_content() {
        let p1 = PackageBuilder::new(manifest("warden.hash"))
            .add_file("a.txt", b"one".to_vec())
            .build()
            .unwrap();
        let p2 = PackageBuilder::new(manifest("warden.hash"))
            .add_file("a.txt", b"two".to_vec())
            .build()
            .unwrap();
        let p1 = PluginPackage::open(Cursor::new(&p1)).unwrap();
        let p2 = PluginPackage::open(Cursor::new(&p2)).unwrap();
        assert_ne!(p1.content_hash(), p2.content_hash());
    }

    #[test]
    fn manifest_toml_roundtrip() {
        let m = manifest("warden.roundtrip");
        let toml_str = toml::to_string_pretty(&m).expect("serialize");
        let parsed: ModuleManifest = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.plugins.len(), 1);
        assert_eq!(parsed.plugins[0].rules[0].pattern, m.plugins[0].rules[0].pattern);
        assert_eq!(parsed.plugins[0].max_file_size, 64 * 1024);
    }
}
