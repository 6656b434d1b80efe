use super::AppState;
use crate::contact::{
    is_valid_email, sanitize_line, sanitize_text, ContactForm, ContactMessage, ContactRejection,
};
use crate::session::fingerprint;
use crate::types::SessionId;

impl AppState {
    /// Validate a contact submission and hand it to the message sink.
    ///
    /// Checks run in a fixed order and the first failure is reported.
    pub async fn submit_contact(
        &self,
        session: &SessionId,
        form: ContactForm,
    ) -> Result<ContactMessage, ContactRejection> {
        let name = sanitize_line(&form.sender_name);
        let email = form.sender_email.trim().to_string();
        let body = sanitize_text(&form.sender_message);
        let captcha = sanitize_line(&form.captcha);

        if captcha.is_empty() {
            return Err(ContactRejection::MissingContact);
        }

        if !self.verify_challenge(session, &captcha).await.passed() {
            return Err(ContactRejection::NotHuman);
        }

        if !is_valid_email(&email) {
            return Err(ContactRejection::EmailInvalid);
        }

        if name.is_empty() || body.is_empty() {
            return Err(ContactRejection::MissingContact);
        }

        if body.chars().count() > self.contact_config.max_message_chars {
            return Err(ContactRejection::MessageTooLong);
        }

        let message = ContactMessage {
            name,
            email,
            body,
            received_at: chrono::Utc::now(),
        };

        match self.sink.deliver(&message).await {
            Ok(()) => {
                tracing::info!(
                    session = %fingerprint(session),
                    sink = self.sink.name(),
                    "Contact message accepted"
                );
                Ok(message)
            }
            Err(e) => {
                tracing::error!(sink = self.sink.name(), "Contact message delivery failed: {}", e);
                Err(ContactRejection::Unsent)
            }
        }
    }
}
