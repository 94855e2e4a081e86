use clap::Subcommand;
use crossbot_core::Database;
use serde_json::json;

use super::{print_json, CmdResult};

#[derive(Subcommand)]
pub enum UserAction {
    /// Crossbucks balance
    Balance { user: String },
    /// Set a user's display name
    Name { user: String, name: String },
}

pub fn run(action: UserAction) -> CmdResult {
    let db = Database::open()?;
    match action {
        UserAction::Balance { user } => {
            let crossbucks = db.balance(&user)?;
            print_json(&json!({ "user": user, "crossbucks": crossbucks }))?;
        }
        UserAction::Name { user, name } => {
            db.ensure_user(&user, Some(&name))?;
            println!("ok");
        }
    }
    Ok(())
}
