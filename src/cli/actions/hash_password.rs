use crate::gate::credentials::hash_password;
use anyhow::{Context, Result};
use argon2::Params;
use secrecy::{ExposeSecret, SecretString};
use std::io::{self, BufRead};

/// Read one line from stdin and print its Argon2id PHC string.
/// # Errors
/// Returns an error if stdin is empty or hashing fails.
pub fn execute() -> Result<()> {
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;
    let password = SecretString::from(line.trim_end_matches(['\r', '\n']).to_string());
    drop(line);

    if password.expose_secret().is_empty() {
        anyhow::bail!("password must not be empty");
    }

    let hash = hash_password(password.expose_secret(), Params::default())?;
    println!("{hash}");

    Ok(())
}
