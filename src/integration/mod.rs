//! Integration with OS services (credential storage).

pub(crate) mod classifier_keyring;
