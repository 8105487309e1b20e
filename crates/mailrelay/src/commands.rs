//! Administrative commands against the store.

use anyhow::{Context, Result};
use mailrelay_core::store::{NewRule, RuleUpdate};
use mailrelay_core::{Database, Domain, LogPage, Rule, RuleId, invalid_rules};
use serde_json::json;
use std::io::Write;

use crate::cli::{DomainsCommand, LogsCommand, OutputArgs, RulesCommand};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Longest subject shown in the log table.
const SUBJECT_WIDTH: usize = 40;

pub async fn rules(db: &Database, command: RulesCommand, out: &mut impl Write) -> Result<()> {
    let repo = db.rules();
    match command {
        RulesCommand::List(output) => {
            let rules = repo.list_active().await?;
            print_rules(&rules, output, out)?;
        }
        RulesCommand::Add {
            pattern,
            forward_to,
            description,
        } => {
            let rule = repo
                .create(NewRule::new(pattern, forward_to).description(description))
                .await
                .context("cannot add rule")?;
            writeln!(out, "Added rule {}: {} -> {}", rule.id, rule.pattern, rule.forward_to)?;
        }
        RulesCommand::Update {
            id,
            pattern,
            forward_to,
            description,
        } => {
            let update = RuleUpdate {
                pattern,
                forward_to,
                description,
            };
            let rule = repo
                .update(RuleId::new(id), update)
                .await
                .with_context(|| format!("cannot update rule {id}"))?;
            writeln!(out, "Updated rule {}: {} -> {}", rule.id, rule.pattern, rule.forward_to)?;
        }
        RulesCommand::Remove { id } => {
            repo.delete(RuleId::new(id))
                .await
                .with_context(|| format!("cannot remove rule {id}"))?;
            writeln!(out, "Removed rule {id}")?;
        }
        RulesCommand::Check => {
            let rules = repo.list_active().await?;
            let invalid = invalid_rules(&rules);
            if invalid.is_empty() {
                writeln!(out, "All {} rules compile", rules.len())?;
            }
            for (rule, diagnostic) in invalid {
                writeln!(out, "Rule {} {:?} never matches:", rule.id, rule.pattern)?;
                for line in diagnostic.lines() {
                    writeln!(out, "    {line}")?;
                }
            }
        }
    }
    Ok(())
}

pub async fn domains(db: &Database, command: DomainsCommand, out: &mut impl Write) -> Result<()> {
    let repo = db.domains();
    match command {
        DomainsCommand::List(output) => {
            let domains = repo.list().await?;
            print_domains(&domains, output, out)?;
        }
        DomainsCommand::Add { name } => {
            let domain = repo.add(&name).await.context("cannot add domain")?;
            writeln!(out, "Added domain {}", domain.name)?;
        }
        DomainsCommand::Remove { name } => {
            repo.remove(&name)
                .await
                .with_context(|| format!("cannot remove domain {name}"))?;
            writeln!(out, "Removed domain {name}")?;
        }
    }
    Ok(())
}

pub async fn logs(db: &Database, command: LogsCommand, out: &mut impl Write) -> Result<()> {
    match command {
        LogsCommand::List {
            page,
            page_size,
            output,
        } => {
            let page = db.logs().list(page, page_size).await?;
            print_logs(&page, output, out)?;
        }
    }
    Ok(())
}

fn print_rules(rules: &[Rule], output: OutputArgs, out: &mut impl Write) -> Result<()> {
    if output.json {
        serde_json::to_writer_pretty(&mut *out, rules)?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(out, "{:>5}  {:>6}  {:<30}  {:<30}  DESCRIPTION", "ID", "HITS", "PATTERN", "FORWARD TO")?;
    for rule in rules {
        writeln!(
            out,
            "{:>5}  {:>6}  {:<30}  {:<30}  {}",
            rule.id.0, rule.hit_count, rule.pattern, rule.forward_to, rule.description
        )?;
    }
    Ok(())
}

fn print_domains(domains: &[Domain], output: OutputArgs, out: &mut impl Write) -> Result<()> {
    if output.json {
        serde_json::to_writer_pretty(&mut *out, domains)?;
        writeln!(out)?;
        return Ok(());
    }

    for domain in domains {
        writeln!(
            out,
            "{}  (added {})",
            domain.name,
            domain.created_at.format(TIME_FORMAT)
        )?;
    }
    Ok(())
}

fn print_logs(page: &LogPage, output: OutputArgs, out: &mut impl Write) -> Result<()> {
    if output.json {
        let value = json!({
            "total": page.total,
            "page": page.page,
            "page_size": page.page_size,
            "entries": page.entries,
        });
        serde_json::to_writer_pretty(&mut *out, &value)?;
        writeln!(out)?;
        return Ok(());
    }

    for entry in &page.entries {
        writeln!(
            out,
            "{:>6}  {}  {:<10}  {} -> {}  {}",
            entry.id.0,
            entry.created_at.format(TIME_FORMAT),
            entry.status.as_str(),
            entry.from,
            entry.to,
            clip(&entry.subject, SUBJECT_WIDTH)
        )?;
        if let Some(error) = &entry.error {
            writeln!(out, "        error: {error}")?;
        }
    }
    writeln!(
        out,
        "Page {} ({} per page), {} total",
        page.page, page.page_size, page.total
    )?;
    Ok(())
}

fn clip(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(width.saturating_sub(1)).collect();
    clipped.push('…');
    clipped
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn run_rules(db: &Database, command: RulesCommand) -> Result<String> {
        let mut out = Vec::new();
        rules(db, command, &mut out).await?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn test_rule_lifecycle() {
        let db = Database::in_memory().await.unwrap();

        let added = run_rules(
            &db,
            RulesCommand::Add {
                pattern: "^sales@".into(),
                forward_to: "team@example.com".into(),
                description: "sales desk".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(added, "Added rule 1: ^sales@ -> team@example.com\n");

        let err = run_rules(
            &db,
            RulesCommand::Add {
                pattern: "(broken".into(),
                forward_to: "team@example.com".into(),
                description: String::new(),
            },
        )
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("Invalid pattern"));

        let listed = run_rules(&db, RulesCommand::List(OutputArgs { json: true }))
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&listed).unwrap();
        assert_eq!(value[0]["pattern"], "^sales@");
        assert_eq!(value[0]["hit_count"], 0);

        let checked = run_rules(&db, RulesCommand::Check).await.unwrap();
        assert_eq!(checked, "All 1 rules compile\n");

        run_rules(&db, RulesCommand::Remove { id: 1 }).await.unwrap();
        assert!(run_rules(&db, RulesCommand::Remove { id: 1 }).await.is_err());
    }

    #[tokio::test]
    async fn test_domains_and_logs_output() {
        let db = Database::in_memory().await.unwrap();
        let mut out = Vec::new();
        domains(
            &db,
            DomainsCommand::Add {
                name: "Example.COM.".into(),
            },
            &mut out,
        )
        .await
        .unwrap();
        assert_eq!(String::from_utf8_lossy(&out), "Added domain example.com\n");

        let mut out = Vec::new();
        logs(
            &db,
            LogsCommand::List {
                page: 1,
                page_size: 20,
                output: OutputArgs { json: true },
            },
            &mut out,
        )
        .await
        .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["total"], 0);
        assert_eq!(value["entries"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_clip() {
        assert_eq!(clip("short", 10), "short");
        assert_eq!(clip("abcdefghijkl", 5), "abcd…");
    }
}
