//! Populate a database with demo users, a group thread, a direct thread and a
//! few messages. Safe to run twice: existing usernames are left alone.

use std::collections::HashMap;

use tracing::info;

use parley_api::auth::hash_password;
use parley_db::Database;
use parley_server::config::Config;

const DEMO_PASSWORD: &str = "password123";
const DEMO_USERS: &[&str] = &["alice", "bob", "carol", "dave"];

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_seed=info,parley_server=info,parley_db=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let db = Database::open(&config.db_path)?;

    let mut ids = HashMap::new();
    let mut created_any = false;
    for &username in DEMO_USERS {
        let id = match db.get_user_by_username(username)? {
            Some(existing) => {
                info!("User {} already exists (id {}), skipping", username, existing.id);
                existing.id
            }
            None => {
                let id = db.create_user(username, &hash_password(DEMO_PASSWORD)?)?;
                info!("Created user {} (id {})", username, id);
                created_any = true;
                id
            }
        };
        ids.insert(username, id);
    }

    if !created_any {
        info!("All demo users already present; threads and messages left untouched");
        return Ok(());
    }

    let all: Vec<i64> = DEMO_USERS.iter().map(|u| ids[u]).collect();
    let general = db.create_group_thread("General", &all)?;
    db.insert_message(general.id, ids["alice"], "Welcome to Parley!")?;
    db.insert_message(general.id, ids["bob"], "Glad to be here.")?;
    db.insert_message(general.id, ids["carol"], "Hi everyone")?;
    info!("Created group thread General (id {})", general.id);

    let (direct, _) = db.get_or_create_direct_thread(ids["alice"], ids["bob"])?;
    db.insert_message(direct.id, ids["alice"], "Lunch tomorrow?")?;
    db.insert_message(direct.id, ids["bob"], "Sounds good")?;
    info!("Created direct thread alice/bob (id {})", direct.id);

    info!("Seed complete. Every demo user's password is {:?}", DEMO_PASSWORD);
    Ok(())
}
