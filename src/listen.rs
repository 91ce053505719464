// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: GPL-3.0-or-later

//! The upload-queue consumer: waits for staged files, hands complete
//! uploads to the publisher and reports the result by mail.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use log::{error, info};

use basic_debian_utils::Address;

use crate::interactor::Interactor;
use crate::mailer::Mailer;
use crate::receiver::{NotifyFileReceiver, QueueFileRef};

/// The listener loop state.
pub struct Listener {
    receiver: NotifyFileReceiver,
    mailer: Box<dyn Mailer>,
    admin: Option<Address>,
    open: HashMap<String, QueueFileRef>,
}

fn render_report(
    changes_name: &str,
    component: Option<&str>,
    output: &str,
    error: Option<&str>,
) -> String {
    let mut body = String::from("<p> This mail is automatically sent by deb-foundry </p>\n");
    body.push_str(&format!(
        "<h2> The inclusion of {changes_name} in {} {}:</h2>\n",
        component.map_or("all components".to_owned(), |comp| comp.to_owned()),
        if error.is_none() { "succeeded" } else { "failed" },
    ));
    if let Some(error) = error {
        body.push_str(&format!("<p> Error is : {error} </p>\n"));
    }
    body.push_str("<h3>Repository output: </h3>\n");
    body.push_str(&format!("<pre>{output}</pre>\n"));
    body
}

impl Listener {
    /// Start watching `dir` and report as `admin` on unauthorized uploads.
    pub fn new(dir: &Path, mailer: Box<dyn Mailer>, admin: Option<Address>) -> Result<Self> {
        let receiver = NotifyFileReceiver::new(dir)?;
        info!("watching events in {}", dir.display());
        Ok(Self {
            receiver,
            mailer,
            admin,
            open: HashMap::new(),
        })
    }

    fn handle_changes(&mut self, interactor: &mut Interactor, reference: QueueFileRef) {
        let (outcome, result) = interactor.process_changes(&reference);

        // release every staged companion the manifest names
        for file in outcome.files_to_release {
            if self.open.remove(&file.id()).is_some() {
                self.receiver.release(file);
            }
        }

        let mut send_to = outcome.send_to;
        if outcome.should_report {
            if let Some(admin) = &self.admin {
                send_to.push(admin.clone());
            }
        }

        let (subject, error) = match &result {
            Ok(()) => {
                info!("included {}", reference.id());
                (format!("Inclusion of {} succeeded", reference.id()), None)
            }
            Err(err) => {
                error!("could not include {}: {err:#}", reference.id());
                (
                    format!("Inclusion of {} failed", reference.id()),
                    Some(format!("{err:#}")),
                )
            }
        };
        let body = render_report(
            &reference.name,
            reference.component.map(|comp| comp.name()),
            &outcome.output,
            error.as_deref(),
        );
        if let Err(err) = self.mailer.send(&send_to, &subject, &body) {
            error!("could not send report mail: {err}");
        }

        // success or failure, the manifest leaves the staging area
        self.receiver.release(reference);
    }

    /// Consume staged files forever; non-manifest files are held until a
    /// change manifest names them.
    pub fn run(&mut self, interactor: &mut Interactor) -> Result<()> {
        loop {
            let reference = self.receiver.next()?;
            if !reference.name.ends_with(".changes") {
                self.open.insert(reference.id(), reference);
                continue;
            }
            self.handle_changes(interactor, reference);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn report_rendering() {
        let body = render_report(
            "aha_0.4.7.2-1_amd64.changes",
            None,
            "reprepro said things",
            None,
        );
        assert!(body.contains("in all components succeeded"));
        assert!(body.contains("<pre>reprepro said things</pre>"));
        assert!(!body.contains("Error is"));

        let body = render_report(
            "aha_0.4.7.2-1_amd64.changes",
            Some("main"),
            "",
            Some("Distribution trusty is not supported"),
        );
        assert!(body.contains("in main failed"));
        assert!(body.contains("Error is : Distribution trusty is not supported"));
    }
}
