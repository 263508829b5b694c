//! `mentor history` - print a submitter's accumulated record.

use anyhow::Result;
use console::style;
use mentor::config::MentorConfig;
use mentor::state::keys::UserKey;
use mentor::state::store::StateStore;
use std::path::Path;

pub fn run(project_dir: &Path, user: &str) -> Result<()> {
    let config = MentorConfig::load(project_dir)?;
    let store = StateStore::new();
    store.load_users(&project_dir.join(&config.state_file))?;

    let snapshot = store.user_snapshot(user);
    if snapshot.is_empty() {
        println!("No submissions recorded for '{}'.", user);
        return Ok(());
    }

    println!("{}", style(format!("Record for {}", user)).bold());
    for key in [
        UserKey::TotalSubmissions,
        UserKey::LastStyleScore,
        UserKey::LastTestPassRate,
        UserKey::LastSubmissionTime,
    ] {
        if let Some(value) = snapshot.get(&key) {
            println!("  {}: {}", key, value);
        }
    }

    if let Some(history) = snapshot.get(&UserKey::FeedbackHistory).and_then(|v| v.as_array()) {
        println!();
        println!("{}", style("Past feedback").bold());
        for record in history {
            let when = record
                .get("timestamp")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown time");
            let summary = record
                .get("summary")
                .and_then(|v| v.as_str())
                .unwrap_or("(no summary)");
            println!("  {} - {}", style(when).dim(), summary);
        }
    }

    Ok(())
}
