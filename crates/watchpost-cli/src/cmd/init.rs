use anyhow::Context;
use std::path::Path;
use watchpost_core::{config::Config, io, paths, Store};

/// Sample feed for the starter `injury-watch` job: one item the keyword
/// classifier flags and one it lets through.
const FEED_FIXTURE: &str = r#"[
  {
    "id": "1",
    "payload": {
      "text": "Tyler Herro suffered an ankle sprain and will miss 2 weeks"
    }
  },
  {
    "id": "2",
    "payload": {
      "text": "Heat signs rookie to two-way contract"
    }
  }
]
"#;

const GAME_ID: &str = "0022400777";

/// Sample box score for the starter `heat-live` job. Edit the numbers and run
/// `watchpost once` again to see a delta published.
const GAME_FIXTURE: &str = r#"{
  "is_terminal": false,
  "state": {
    "Bam Adebayo": { "points": 10, "rebounds": 6, "assists": 3, "turnovers": 1 },
    "Tyler Herro": { "points": 14, "rebounds": 2, "assists": 4, "turnovers": 2 }
  }
}
"#;

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing watchpost in: {}", root.display());

    for dir in [paths::WATCHPOST_DIR, paths::FIXTURES_DIR] {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    let config_path = paths::config_path(root);
    let config = if config_path.exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
        Config::load(root).context("failed to load existing config")?
    } else {
        let cfg = Config::starter();
        cfg.save(root).context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
        cfg
    };

    let fixtures = paths::fixtures_dir(root);
    write_fixture(root, &fixtures.join("feed.json"), FEED_FIXTURE)?;
    write_fixture(
        root,
        &fixtures.join("games").join(format!("{GAME_ID}.json")),
        GAME_FIXTURE,
    )?;

    let store_path = config.store_path(root);
    let existed = store_path.exists();
    Store::open(&store_path)
        .with_context(|| format!("failed to open store {}", store_path.display()))?;
    report(root, &store_path, !existed);

    println!("\nNext: watchpost once");
    Ok(())
}

fn write_fixture(root: &Path, path: &Path, body: &str) -> anyhow::Result<()> {
    let created = io::write_if_missing(path, body.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    report(root, path, created);
    Ok(())
}

fn report(root: &Path, path: &Path, created: bool) {
    let shown = path.strip_prefix(root).unwrap_or(path).display();
    if created {
        println!("  created: {shown}");
    } else {
        println!("  exists:  {shown}");
    }
}
