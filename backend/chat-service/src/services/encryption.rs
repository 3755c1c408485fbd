//! Envelope encryption for message content and attachment metadata.
//!
//! Every call derives a fresh key with 100k PBKDF2 rounds, so all work runs
//! on tokio's blocking pool instead of the request task.

use crate::error::{AppError, AppResult};
use crate::models::{Attachment, Message};
use crypto_core::{EnvelopeCipher, EnvelopeError};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct EncryptionService {
    cipher: Arc<EnvelopeCipher>,
}

impl EncryptionService {
    pub fn new(cipher: EnvelopeCipher) -> Self {
        Self {
            cipher: Arc::new(cipher),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.cipher.is_configured()
    }

    async fn run_blocking<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&EnvelopeCipher) -> Result<T, EnvelopeError> + Send + 'static,
        T: Send + 'static,
    {
        let cipher = Arc::clone(&self.cipher);
        tokio::task::spawn_blocking(move || f(&cipher))
            .await
            .map_err(|e| AppError::Internal(format!("crypto worker: {e}")))?
            .map_err(AppError::from)
    }

    pub async fn encrypt(&self, plaintext: &str) -> AppResult<String> {
        let plaintext = plaintext.to_owned();
        self.run_blocking(move |c| c.encrypt(&plaintext)).await
    }

    pub async fn decrypt(&self, envelope: &str) -> AppResult<String> {
        let envelope = envelope.to_owned();
        self.run_blocking(move |c| c.decrypt(&envelope)).await
    }

    /// Encrypt `url` and `filename`; size and mime type stay readable.
    pub async fn encrypt_attachment(&self, attachment: Attachment) -> AppResult<Attachment> {
        self.run_blocking(move |c| seal_attachment(c, attachment))
            .await
    }

    /// No-op for attachments that were never encrypted.
    pub async fn decrypt_attachment(&self, attachment: Attachment) -> AppResult<Attachment> {
        if !attachment.encrypted {
            return Ok(attachment);
        }
        self.run_blocking(move |c| open_attachment(c, attachment))
            .await
    }

    /// Content and every attachment of a new message, in one trip to the pool.
    pub async fn encrypt_parts(
        &self,
        content: &str,
        attachments: Vec<Attachment>,
    ) -> AppResult<(String, Vec<Attachment>)> {
        let content = content.to_owned();
        self.run_blocking(move |c| {
            let content = c.encrypt(&content)?;
            let attachments = attachments
                .into_iter()
                .map(|a| seal_attachment(c, a))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((content, attachments))
        })
        .await
    }

    /// Reader's view of a stored message.
    pub async fn decrypt_message(&self, message: Message) -> AppResult<Message> {
        self.run_blocking(move |c| {
            let mut message = message;
            message.content = c.decrypt(&message.content)?;
            message.attachments = std::mem::take(&mut message.attachments)
                .into_iter()
                .map(|a| {
                    if a.encrypted {
                        open_attachment(c, a)
                    } else {
                        Ok(a)
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(message)
        })
        .await
    }
}

fn seal_attachment(
    cipher: &EnvelopeCipher,
    attachment: Attachment,
) -> Result<Attachment, EnvelopeError> {
    Ok(Attachment {
        url: cipher.encrypt(&attachment.url)?,
        filename: cipher.encrypt(&attachment.filename)?,
        encrypted: true,
        ..attachment
    })
}

fn open_attachment(
    cipher: &EnvelopeCipher,
    attachment: Attachment,
) -> Result<Attachment, EnvelopeError> {
    Ok(Attachment {
        url: cipher.decrypt(&attachment.url)?,
        filename: cipher.decrypt(&attachment.filename)?,
        encrypted: false,
        ..attachment
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageType;
    use uuid::Uuid;

    fn service() -> EncryptionService {
        EncryptionService::new(EnvelopeCipher::new(Some("unit-test-secret".into())))
    }

    fn attachment() -> Attachment {
        Attachment {
            url: "https://cdn.example.com/contract.pdf".into(),
            filename: "contract.pdf".into(),
            size: 2048,
            mime_type: "application/pdf".into(),
            encrypted: false,
        }
    }

    #[tokio::test]
    async fn test_attachment_round_trip_keeps_plain_fields() {
        let svc = service();
        let sealed = svc.encrypt_attachment(attachment()).await.unwrap();

        assert!(sealed.encrypted);
        assert_ne!(sealed.url, attachment().url);
        assert_eq!(sealed.size, 2048);
        assert_eq!(sealed.mime_type, "application/pdf");

        let opened = svc.decrypt_attachment(sealed).await.unwrap();
        assert_eq!(opened, attachment());
    }

    #[tokio::test]
    async fn test_decrypting_plain_attachment_is_noop() {
        let svc = service();
        let plain = attachment();
        assert_eq!(svc.decrypt_attachment(plain.clone()).await.unwrap(), plain);
    }

    #[tokio::test]
    async fn test_decrypt_message_restores_content() {
        let svc = service();
        let (content, attachments) = svc
            .encrypt_parts("hello", vec![attachment()])
            .await
            .unwrap();
        let stored = Message::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            content,
            MessageType::File,
            attachments,
        );

        let view = svc.decrypt_message(stored).await.unwrap();
        assert_eq!(view.content, "hello");
        assert_eq!(view.attachments, vec![attachment()]);
    }

    #[tokio::test]
    async fn test_missing_secret_fails_closed() {
        let svc = EncryptionService::new(EnvelopeCipher::new(None));
        assert!(!svc.is_configured());
        assert!(matches!(
            svc.encrypt("hello").await,
            Err(AppError::ServerConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_envelope_is_decryption_error() {
        let svc = service();
        assert!(matches!(
            svc.decrypt("a:b:c:d").await,
            Err(AppError::Decryption(_))
        ));
    }
}
