// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: GPL-3.0-or-later

//! Report mail dispatch through the system sendmail.

use std::io::{self, Write};
use std::process::{Command, Stdio};

use basic_debian_utils::Address;

/// Narrow interface the listener reports through.
pub trait Mailer: Send {
    /// Send an HTML mail to the given recipients.
    fn send(&self, to: &[Address], subject: &str, body: &str) -> io::Result<()>;
}

/// Mailer piping messages into `sendmail -t`.
#[derive(Debug)]
pub struct SendmailMailer {
    from: Address,
}

impl SendmailMailer {
    /// Mailer sending as the given identity.
    pub fn new(name: &str, email: &str) -> Self {
        Self {
            from: Address {
                name: name.to_owned(),
                email: email.to_owned(),
            },
        }
    }
}

impl Mailer for SendmailMailer {
    fn send(&self, to: &[Address], subject: &str, body: &str) -> io::Result<()> {
        if to.is_empty() {
            return Ok(());
        }

        let recipients = to
            .iter()
            .map(|address| address.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        let mut message = String::new();
        message.push_str(&format!("From: {}\n", self.from));
        message.push_str(&format!("To: {recipients}\n"));
        message.push_str(&format!(
            "Subject: {}\n",
            subject.trim_matches(['\n', ' ', '<', '>'])
        ));
        message.push_str("MIME-Version: 1.0\n");
        message.push_str("Content-Type: text/html; charset=\"UTF-8\"\n");
        message.push('\n');
        message.push_str(body);

        let mut child = Command::new("sendmail")
            .arg("-t")
            .stdin(Stdio::piped())
            .spawn()?;
        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(message.as_bytes())?;
        }
        let status = child.wait()?;
        if !status.success() {
            return Err(io::Error::other(format!("sendmail exited with {status}")));
        }
        Ok(())
    }
}
