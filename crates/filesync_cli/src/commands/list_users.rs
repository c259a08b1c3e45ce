//! List-users command implementation.

use filesync_server::CredentialStore;
use std::path::Path;

/// Runs the list-users command.
pub fn run(users_file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = CredentialStore::load(users_file)?;
    if store.is_empty() {
        println!("No users in {}", users_file.display());
        return Ok(());
    }
    for username in store.usernames() {
        println!("{}", username);
    }
    Ok(())
}
