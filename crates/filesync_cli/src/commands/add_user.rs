//! Add-user command implementation.

use filesync_server::CredentialStore;
use std::path::Path;

/// Runs the add-user command.
pub fn run(users_file: &Path, username: &str, password: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = CredentialStore::load_or_default(users_file)?;
    let created = store.insert(username, password)?;
    store.save(users_file)?;

    if created {
        println!("Added user '{}' to {}", username, users_file.display());
    } else {
        println!("Updated password for '{}' in {}", username, users_file.display());
    }
    Ok(())
}
