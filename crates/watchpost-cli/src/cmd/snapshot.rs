use crate::output::{print_json, print_table, when};
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum SnapshotSubcommand {
    /// List stored snapshots
    List,

    /// Show the stored state of one entity
    Show {
        entity_id: String,
    },

    /// Drop the snapshot for one entity; its next observation is a baseline
    Purge {
        entity_id: String,
    },
}

pub fn run(root: &Path, subcmd: SnapshotSubcommand, json: bool) -> anyhow::Result<()> {
    let (_, store) = super::open(root)?;
    let snapshots = store.snapshots();

    match subcmd {
        SnapshotSubcommand::List => {
            let records = snapshots.list()?;
            if json {
                return print_json(&records);
            }
            if records.is_empty() {
                println!("No snapshots.");
                return Ok(());
            }
            let rows = records
                .iter()
                .map(|r| {
                    vec![
                        r.entity_id.clone(),
                        r.state.actors.len().to_string(),
                        when(Some(r.captured_at)),
                        when(r.terminal_since),
                    ]
                })
                .collect();
            print_table(&["ENTITY", "ACTORS", "CAPTURED", "TERMINAL SINCE"], rows);
        }
        SnapshotSubcommand::Show { entity_id } => {
            let record = snapshots
                .load(&entity_id)?
                .ok_or_else(|| anyhow::anyhow!("no snapshot for '{entity_id}'"))?;
            if json {
                return print_json(&record);
            }
            println!("Entity:    {}", record.entity_id);
            println!("Captured:  {}", record.captured_at.to_rfc3339());
            if let Some(at) = record.terminal_since {
                println!("Terminal:  {}", at.to_rfc3339());
            }
            for (actor, line) in &record.state.actors {
                let stats: Vec<String> = line.iter().map(|(k, v)| format!("{k}={v}")).collect();
                println!("  {actor}: {}", stats.join(" "));
            }
        }
        SnapshotSubcommand::Purge { entity_id } => {
            let removed = snapshots.purge(&entity_id)?;
            if json {
                return print_json(&serde_json::json!({
                    "entity_id": entity_id,
                    "purged": removed,
                }));
            }
            if removed {
                println!("Purged snapshot for '{entity_id}'.");
            } else {
                println!("No snapshot for '{entity_id}'.");
            }
        }
    }
    Ok(())
}
