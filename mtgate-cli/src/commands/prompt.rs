//! Operator prompts.
//!
//! The setup loop talks to a [`Prompter`]; [`TerminalPrompter`] backs it with
//! dialoguer. [`answer`] turns one controller [`Prompt`] into answers.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use dialoguer::{Confirm, Input, Select};

use mtgate_core::{Answers, Choice, Field, Prompt, SecretAnswer};

/// Menu entry shown for an existing deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MenuEntry {
    pub label: &'static str,
    pub choice: Choice,
}

/// The menu for an existing deployment. Repair is only offered when there is
/// something to repair.
pub fn menu(has_issues: bool) -> Vec<MenuEntry> {
    let mut entries = vec![
        MenuEntry {
            label: "Show connection link (leave everything as is)",
            choice: Choice::Show,
        },
        MenuEntry {
            label: "Change the existing setup (reconfigure)",
            choice: Choice::Reconfigure,
        },
    ];
    if has_issues {
        entries.push(MenuEntry {
            label: "Fix the detected problems (repair)",
            choice: Choice::Repair,
        });
    }
    entries.push(MenuEntry {
        label: "Exit",
        choice: Choice::Abort,
    });
    entries
}

pub trait Prompter {
    /// Index into `items`.
    fn select(&mut self, prompt: &str, items: &[&str]) -> Result<usize>;
    /// Free text. An empty answer means `default` when there is one.
    fn text(&mut self, prompt: &str, default: Option<&str>) -> Result<String>;
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool>;
}

/// Prompts on the controlling terminal.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn select(&mut self, prompt: &str, items: &[&str]) -> Result<usize> {
        Select::new()
            .with_prompt(prompt)
            .items(items)
            .default(0)
            .interact()
            .context("prompt failed")
    }

    fn text(&mut self, prompt: &str, default: Option<&str>) -> Result<String> {
        let mut input = Input::<String>::new().with_prompt(prompt).allow_empty(true);
        if let Some(default) = default {
            input = input.default(default.to_string());
        }
        input.interact_text().context("prompt failed")
    }

    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool> {
        Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()
            .context("prompt failed")
    }
}

pub fn choose<P: Prompter + ?Sized>(prompter: &mut P, has_issues: bool) -> Result<Choice> {
    let entries = menu(has_issues);
    let labels: Vec<&str> = entries.iter().map(|e| e.label).collect();
    let index = prompter.select("What do you want to do?", &labels)?;
    entries
        .get(index)
        .map(|e| e.choice)
        .context("menu selection out of range")
}

fn text_or_default<P: Prompter + ?Sized>(
    prompter: &mut P,
    label: &str,
    default: Option<&str>,
) -> Result<String> {
    let raw = prompter.text(label, default)?;
    let raw = raw.trim();
    Ok(match (raw.is_empty(), default) {
        (true, Some(default)) => default.to_string(),
        _ => raw.to_string(),
    })
}

fn port<P: Prompter + ?Sized>(prompter: &mut P, label: &str, default: Option<&str>) -> Result<i64> {
    loop {
        let raw = text_or_default(prompter, label, default)?;
        match raw.parse::<i64>() {
            Ok(port) => return Ok(port),
            Err(_) => eprintln!("{} '{raw}' is not a number", "✗".red()),
        }
    }
}

/// Asks one question and records the answer.
pub fn answer<P: Prompter + ?Sized>(
    prompter: &mut P,
    prompt: &Prompt,
    answers: &mut Answers,
) -> Result<()> {
    let default = prompt.default.as_deref();
    match prompt.field {
        Field::Domain => {
            let label = "Service domain (e.g. proxy.example.com)";
            answers.domain = Some(text_or_default(prompter, label, default)?);
        }
        Field::ListenPort => {
            let label = "Gateway listen port (local, must be free, not 443)";
            answers.listen_port = Some(port(prompter, label, default)?);
        }
        Field::BackendPort => {
            let label = "Nginx backend port for the service domain";
            answers.backend_port = Some(port(prompter, label, default)?);
        }
        Field::MasqueradeDomain => {
            let label = "TLS masquerade domain";
            answers.masquerade_domain = Some(text_or_default(prompter, label, default)?);
        }
        Field::Secret => answers.secret = Some(secret(prompter, default)?),
        Field::AdTag => {
            let label = "Ad tag from @MTProxybot (empty for none)";
            answers.ad_tag = Some(text_or_default(prompter, label, default)?);
        }
        // Kept from the routing artifact or set by a description only.
        Field::CompanionDomain => bail!("{} is not asked interactively", prompt.field),
    }
    Ok(())
}

fn secret<P: Prompter + ?Sized>(prompter: &mut P, current: Option<&str>) -> Result<SecretAnswer> {
    if let Some(current) = current {
        println!("Current secret: {current}");
        if !prompter.confirm("Change the secret?", false)? {
            return Ok(SecretAnswer::Keep);
        }
    }
    if prompter.confirm("Generate a new random secret?", true)? {
        return Ok(SecretAnswer::Generate);
    }
    let raw = prompter.text("Secret (32 hex characters)", None)?;
    Ok(SecretAnswer::Provided(raw.trim().to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
