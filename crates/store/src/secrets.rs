use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;

use age::x25519;
use atelier_core::{AtelierError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secrecy::ExposeSecret;

/// Encryption key for API credentials. An age x25519 identity generated on
/// first run and persisted to the private key file; the matching recipient
/// encrypts, the identity decrypts.
pub struct SecretKey {
    identity: x25519::Identity,
}

impl SecretKey {
    /// Loads the identity from `path`, generating and persisting a fresh one
    /// when the file is absent.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let line = content
                .lines()
                .map(|l| l.trim())
                .find(|l| !l.is_empty() && !l.starts_with('#'))
                .ok_or(AtelierError::InvalidDocument("empty key file"))?;
            let identity = x25519::Identity::from_str(line)
                .map_err(|e| AtelierError::Other(format!("invalid identity: {e}")))?;
            return Ok(Self { identity });
        }
        let identity = x25519::Identity::generate();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, identity.to_string().expose_secret())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(Self { identity })
    }

    /// Encrypts a plaintext credential; output is base64 so it can sit in a
    /// JSON document.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let recipient = self.identity.to_public();
        let encryptor = age::Encryptor::with_recipients(vec![Box::new(recipient)])
            .ok_or(AtelierError::InvalidDocument("missing recipients"))?;
        let mut output = Vec::new();
        let mut writer = encryptor
            .wrap_output(&mut output)
            .map_err(|e| AtelierError::Other(e.to_string()))?;
        writer.write_all(plaintext.as_bytes())?;
        writer
            .finish()
            .map_err(|e| AtelierError::Other(e.to_string()))?;
        Ok(BASE64.encode(output))
    }

    pub fn decrypt(&self, ciphertext_b64: &str) -> Result<String> {
        let ciphertext = BASE64
            .decode(ciphertext_b64.trim())
            .map_err(|e| AtelierError::Other(e.to_string()))?;
        let decryptor = match age::Decryptor::new(&ciphertext[..])
            .map_err(|e| AtelierError::Other(e.to_string()))?
        {
            age::Decryptor::Recipients(d) => d,
            _ => return Err(AtelierError::InvalidDocument("unsupported decryptor")),
        };
        let identities: Vec<Box<dyn age::Identity>> = vec![Box::new(self.identity.clone())];
        let mut decrypted = Vec::new();
        let mut reader = decryptor
            .decrypt(identities.iter().map(|id| id.as_ref()))
            .map_err(|e| AtelierError::Other(e.to_string()))?;
        reader.read_to_end(&mut decrypted)?;
        String::from_utf8(decrypted).map_err(|e| AtelierError::Other(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn generates_key_file_on_first_run() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".secret.key");
        assert!(!path.exists());
        let key = SecretKey::load_or_generate(&path).unwrap();
        assert!(path.exists());
        let cipher = key.encrypt("sk-secret").unwrap();
        assert_eq!(key.decrypt(&cipher).unwrap(), "sk-secret");
    }

    #[test]
    fn reloaded_key_decrypts_previous_ciphertext() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".secret.key");
        let cipher = {
            let key = SecretKey::load_or_generate(&path).unwrap();
            key.encrypt("AIabcdef").unwrap()
        };
        let key = SecretKey::load_or_generate(&path).unwrap();
        assert_eq!(key.decrypt(&cipher).unwrap(), "AIabcdef");
    }

    #[test]
    fn ciphertext_does_not_leak_plaintext() {
        let dir = tempdir().unwrap();
        let key = SecretKey::load_or_generate(&dir.path().join(".secret.key")).unwrap();
        let cipher = key.encrypt("sk-very-secret-key").unwrap();
        assert!(!cipher.contains("sk-very-secret-key"));
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let dir = tempdir().unwrap();
        let a = SecretKey::load_or_generate(&dir.path().join("a.key")).unwrap();
        let b = SecretKey::load_or_generate(&dir.path().join("b.key")).unwrap();
        let cipher = a.encrypt("sk-secret").unwrap();
        assert!(b.decrypt(&cipher).is_err());
    }
}
