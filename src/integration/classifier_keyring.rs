//! Credential storage for the remote metadata classifier.

use keyring::Entry;

const CLASSIFIER_SERVICE_NAME: &str = "scenecast.classifier";
const CLASSIFIER_ACCOUNT: &str = "default";

/// Takes precedence over the keyring when set and non-empty.
pub const CLASSIFIER_KEY_ENV: &str = "SCENECAST_CLASSIFIER_KEY";

fn classifier_entry() -> Result<Entry, String> {
    Entry::new(CLASSIFIER_SERVICE_NAME, CLASSIFIER_ACCOUNT)
        .map_err(|err| format!("failed to create keyring entry for the classifier: {err}"))
}

fn keyring_error_hint(error: &str) -> Option<String> {
    if error.contains("org.freedesktop.DBus.Error.ServiceUnknown") {
        return Some(format!(
            "no Secret Service provider is available. Start a Secret Service provider or set {CLASSIFIER_KEY_ENV}."
        ));
    }
    None
}

fn format_keyring_error(operation: &str, error: &str) -> String {
    let base = format!("{operation} failed in system keyring: {error}");
    match keyring_error_hint(error) {
        Some(hint) => format!("{base}. Hint: {hint}"),
        None => base,
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Saves the classifier credential into the OS keyring.
pub fn set_classifier_credential(secret: &str) -> Result<(), String> {
    let secret = non_empty(secret).ok_or_else(|| "credential must not be empty".to_string())?;
    let entry = classifier_entry()?;
    entry.set_password(&secret).map_err(|err| {
        let detail = format!("failed to set keyring password: {err}");
        format_keyring_error("save classifier credential", detail.as_str())
    })
}

/// Loads the classifier credential from the OS keyring.
pub fn get_keyring_credential() -> Result<Option<String>, String> {
    let entry = classifier_entry()?;
    match entry.get_password() {
        Ok(secret) => Ok(non_empty(&secret)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => {
            let detail = format!("failed to get keyring password: {err}");
            Err(format_keyring_error(
                "load classifier credential",
                detail.as_str(),
            ))
        }
    }
}

/// Picks the environment override if present, otherwise the keyring value.
pub fn resolve_credential(
    env_value: Option<String>,
    keyring_lookup: impl FnOnce() -> Result<Option<String>, String>,
) -> Result<Option<String>, String> {
    if let Some(value) = env_value.as_deref().and_then(non_empty) {
        return Ok(Some(value));
    }
    keyring_lookup()
}

/// The credential the classifier should use right now, if any.
pub fn load_classifier_credential() -> Result<Option<String>, String> {
    resolve_credential(std::env::var(CLASSIFIER_KEY_ENV).ok(), get_keyring_credential)
}
