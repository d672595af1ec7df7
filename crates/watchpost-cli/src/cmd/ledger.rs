use crate::output::{print_json, print_table, when};
use clap::Subcommand;
use std::path::Path;
use watchpost_core::LedgerEntry;

#[derive(Subcommand)]
pub enum LedgerSubcommand {
    /// List ledger entries, newest first
    List {
        /// Only entries of this kind (job name)
        #[arg(long)]
        kind: Option<String>,
    },

    /// Claims with no recorded outcome
    Unresolved,

    /// Show one entry
    Show {
        /// Kind (job name)
        kind: String,
        /// Event or action id
        id: String,
    },
}

pub fn run(root: &Path, subcmd: LedgerSubcommand, json: bool) -> anyhow::Result<()> {
    let (_, store) = super::open(root)?;
    let ledger = store.ledger();
    match subcmd {
        LedgerSubcommand::List { kind } => list(&ledger.list(kind.as_deref())?, json),
        LedgerSubcommand::Unresolved => list(&ledger.unresolved()?, json),
        LedgerSubcommand::Show { kind, id } => {
            let entry = ledger
                .get(&kind, &id)?
                .ok_or_else(|| anyhow::anyhow!("no ledger entry for {kind}/{id}"))?;
            show(&entry, json)
        }
    }
}

fn list(entries: &[LedgerEntry], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No ledger entries.");
        return Ok(());
    }
    let rows = entries
        .iter()
        .map(|e| {
            vec![
                e.kind.clone(),
                e.id.clone(),
                e.scope.clone(),
                when(Some(e.claimed_at)),
                status_label(e).to_string(),
                e.external_ref.clone().unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();
    print_table(&["KIND", "ID", "SCOPE", "CLAIMED", "STATUS", "REF"], rows);
    Ok(())
}

fn show(entry: &LedgerEntry, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(entry);
    }
    println!("Kind:      {}", entry.kind);
    println!("Id:        {}", entry.id);
    println!("Scope:     {}", entry.scope);
    println!("Claimed:   {}", entry.claimed_at.to_rfc3339());
    println!("Status:    {}", status_label(entry));
    if let Some(at) = entry.resolved_at {
        println!("Resolved:  {}", at.to_rfc3339());
    }
    if let Some(r) = &entry.external_ref {
        println!("Ref:       {r}");
    }
    if let Some(note) = &entry.note {
        println!("Note:      {note}");
    }
    Ok(())
}

fn status_label(entry: &LedgerEntry) -> &'static str {
    match (entry.is_resolved(), entry.action_taken) {
        (false, _) => "pending",
        (true, true) => "acted",
        (true, false) => "skipped",
    }
}
