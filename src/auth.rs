use anyhow::{Result, bail};
use std::io::{self, BufRead, IsTerminal};
use zeroize::Zeroizing;

pub const PASSWORD_ENV: &str = "SEALBOX_PASSWORD";
pub const NEW_PASSWORD_ENV: &str = "SEALBOX_NEW_PASSWORD";
pub const BUNDLE_PASSWORD_ENV: &str = "SEALBOX_BUNDLE_PASSWORD";

/// Passphrase for encryption, decryption or unlocking.
///
/// Looked up in `SEALBOX_PASSWORD`, then the first line of a piped stdin,
/// then an interactive prompt.
pub fn read_password() -> Result<Zeroizing<String>> {
    read_from(PASSWORD_ENV, "Password: ")
}

/// Password protecting an exported settings bundle.
pub fn read_bundle_password() -> Result<Zeroizing<String>> {
    read_from(BUNDLE_PASSWORD_ENV, "Bundle password: ")
}

/// A passphrase that is about to be set, confirmed when typed interactively.
///
/// `SEALBOX_NEW_PASSWORD` skips the confirmation. Piped stdin must carry
/// the password twice, one per line.
pub fn read_new_password_with_confirmation() -> Result<Zeroizing<String>> {
    read_new(NEW_PASSWORD_ENV)
}

/// Password for a bundle about to be exported; `SEALBOX_BUNDLE_PASSWORD`
/// skips the confirmation.
pub fn read_new_bundle_password() -> Result<Zeroizing<String>> {
    read_new(BUNDLE_PASSWORD_ENV)
}

fn read_new(var: &str) -> Result<Zeroizing<String>> {
    if let Some(pw) = from_env(var) {
        return Ok(pw);
    }

    if !io::stdin().is_terminal() {
        let stdin = io::stdin();
        let mut handle = stdin.lock();

        let mut pw1 = Zeroizing::new(String::new());
        let mut pw2 = Zeroizing::new(String::new());

        handle.read_line(&mut pw1)?;
        handle.read_line(&mut pw2)?;

        trim_newline(&mut pw1);
        trim_newline(&mut pw2);

        return confirm(pw1, &pw2);
    }

    let pw1 = Zeroizing::new(rpassword::prompt_password("New password: ")?);
    let pw2 = Zeroizing::new(rpassword::prompt_password("Confirm password: ")?);
    confirm(pw1, &pw2)
}

fn read_from(var: &str, prompt: &str) -> Result<Zeroizing<String>> {
    if let Some(pw) = from_env(var) {
        return Ok(pw);
    }

    //  printf "%s" "$SECRET" | sealbox decrypt-text ...
    if !io::stdin().is_terminal() {
        let mut buf = Zeroizing::new(String::new());
        io::stdin().read_line(&mut buf)?;
        trim_newline(&mut buf);

        if !buf.is_empty() {
            return Ok(buf);
        }
    } else {
        let pw = Zeroizing::new(rpassword::prompt_password(prompt)?);
        if !pw.is_empty() {
            return Ok(pw);
        }
    }

    bail!("No password provided")
}

fn from_env(var: &str) -> Option<Zeroizing<String>> {
    std::env::var(var)
        .ok()
        .filter(|pw| !pw.is_empty())
        .map(Zeroizing::new)
}

fn confirm(pw1: Zeroizing<String>, pw2: &str) -> Result<Zeroizing<String>> {
    if pw1.is_empty() {
        bail!("password cannot be empty");
    }

    if pw1.as_str() != pw2 {
        bail!("passwords do not match");
    }

    Ok(pw1)
}

fn trim_newline(s: &mut String) {
    while s.ends_with('\n') || s.ends_with('\r') {
        s.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_newline_strips_crlf() {
        let mut s = String::from("secret\r\n");
        trim_newline(&mut s);
        assert_eq!(s, "secret");
    }

    #[test]
    fn confirm_rejects_mismatch_and_empty() {
        assert!(confirm(Zeroizing::new("a".into()), "b").is_err());
        assert!(confirm(Zeroizing::new(String::new()), "").is_err());
        assert_eq!(confirm(Zeroizing::new("a".into()), "a").unwrap().as_str(), "a");
    }
}
