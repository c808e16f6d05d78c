use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;

use volunteer_checkin::auth::{JwtValidator, Role, DEFAULT_AUDIENCE, DEFAULT_ISSUER};
use volunteer_checkin::domain::{Event, EventId, IdentityId};
use volunteer_checkin::infra::{
    AttendanceLedger, DocumentAttendanceLedger, DocumentEmbeddingStore, DocumentEventRegistry,
    DocumentStore, EmbeddingStore, EventRegistry, SqliteDocumentStore,
};

fn print_help() {
    eprintln!(
        "\
volunteer-checkin-admin

USAGE:
  volunteer-checkin-admin <command> [options]

COMMANDS:
  migrate                         Run database migrations
  issue-token                     Mint a JWT for a volunteer or administrator
  create-event                    Create an event
  register-volunteer              Add identities to an event's registration set
  list-events                     List events with their registration counts
  export-attendance               Export an event's attendance to JSON/NDJSON

COMMON OPTIONS:
  --database-url <sqlite_url>     (defaults to env DATABASE_URL)

issue-token OPTIONS:
  --subject <identity_id>         (required)
  --role <volunteer|admin>        (default: volunteer)
  --ttl-hours <n>                 (default: 24)
  --secret <secret>               (defaults to env JWT_SECRET)
  --issuer <iss>                  (defaults to env JWT_ISSUER or volunteer-checkin)
  --audience <aud>                (defaults to env JWT_AUDIENCE or volunteer-checkin-api)

create-event OPTIONS:
  --event-id <id>                 (optional; generated when omitted)
  --title <text>                  (optional)
  --register <id,id,...>          (optional) Identities registered up front

register-volunteer OPTIONS:
  --event-id <id>                 (required)
  --identity-id <id,id,...>       (required)

export-attendance OPTIONS:
  --event-id <id>                 (required)
  --output <path>                 (optional) Output file path (default: stdout)
  --format <json|ndjson>          (default: ndjson)
"
    );
}

fn require_database_url(database_url: Option<String>) -> anyhow::Result<String> {
    database_url
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required (or pass --database-url)"))
}

fn require_value(args: &mut VecDeque<String>, flag: &str) -> anyhow::Result<String> {
    args.pop_front()
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

fn split_ids(raw: &str) -> Vec<IdentityId> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(IdentityId::new)
        .collect()
}

async fn open_store(database_url: Option<String>) -> anyhow::Result<Arc<dyn DocumentStore>> {
    let database_url = require_database_url(database_url)?;
    let store = SqliteDocumentStore::connect(&database_url, 5).await?;
    Ok(Arc::new(store))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportFormat {
    Json,
    Ndjson,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "-h" | "--help" | "help") {
        print_help();
        return Ok(());
    }

    match command.as_str() {
        "migrate" => {
            let mut database_url: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => {
                        database_url = Some(require_value(&mut args, "--database-url")?)
                    }
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            // connect() applies pending migrations
            open_store(database_url).await?;
            println!("ok: migrations applied");
            Ok(())
        }
        "issue-token" => {
            let mut subject: Option<String> = None;
            let mut role = Role::Volunteer;
            let mut ttl_hours: i64 = 24;
            let mut secret = std::env::var("JWT_SECRET").ok();
            let mut issuer =
                std::env::var("JWT_ISSUER").unwrap_or_else(|_| DEFAULT_ISSUER.to_string());
            let mut audience =
                std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| DEFAULT_AUDIENCE.to_string());

            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--subject" => subject = Some(require_value(&mut args, "--subject")?),
                    "--role" => {
                        let raw = require_value(&mut args, "--role")?;
                        role = raw
                            .parse()
                            .map_err(|_| anyhow::anyhow!("invalid --role: {raw}"))?;
                    }
                    "--ttl-hours" => {
                        let raw = require_value(&mut args, "--ttl-hours")?;
                        ttl_hours = raw
                            .parse()
                            .map_err(|e| anyhow::anyhow!("invalid --ttl-hours: {e}"))?;
                        anyhow::ensure!(ttl_hours > 0, "--ttl-hours must be positive");
                    }
                    "--secret" => secret = Some(require_value(&mut args, "--secret")?),
                    "--issuer" => issuer = require_value(&mut args, "--issuer")?,
                    "--audience" => audience = require_value(&mut args, "--audience")?,
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let subject = subject.ok_or_else(|| anyhow::anyhow!("--subject is required"))?;
            let secret = secret
                .filter(|s| !s.is_empty())
                .ok_or_else(|| anyhow::anyhow!("JWT_SECRET is required (or pass --secret)"))?;

            let validator = JwtValidator::new(secret.as_bytes(), &issuer, &audience);
            let token = validator.issue(&subject, role, chrono::Duration::hours(ttl_hours))?;
            println!("{token}");
            Ok(())
        }
        "create-event" => {
            let mut database_url: Option<String> = None;
            let mut event_id: Option<EventId> = None;
            let mut title: Option<String> = None;
            let mut register: Vec<IdentityId> = Vec::new();

            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => {
                        database_url = Some(require_value(&mut args, "--database-url")?)
                    }
                    "--event-id" => {
                        event_id = Some(EventId::new(require_value(&mut args, "--event-id")?))
                    }
                    "--title" => title = Some(require_value(&mut args, "--title")?),
                    "--register" => register = split_ids(&require_value(&mut args, "--register")?),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let store = open_store(database_url).await?;
            let events = DocumentEventRegistry::new(store);
            let event = Event::new(event_id.unwrap_or_else(EventId::generate), title)
                .with_registrations(register);
            let created = events.create_event(event).await?;
            println!("{}", serde_json::to_string_pretty(&created)?);
            Ok(())
        }
        "register-volunteer" => {
            let mut database_url: Option<String> = None;
            let mut event_id: Option<EventId> = None;
            let mut identity_ids: Vec<IdentityId> = Vec::new();

            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => {
                        database_url = Some(require_value(&mut args, "--database-url")?)
                    }
                    "--event-id" => {
                        event_id = Some(EventId::new(require_value(&mut args, "--event-id")?))
                    }
                    "--identity-id" => {
                        identity_ids.extend(split_ids(&require_value(&mut args, "--identity-id")?))
                    }
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let event_id = event_id.ok_or_else(|| anyhow::anyhow!("--event-id is required"))?;
            anyhow::ensure!(!identity_ids.is_empty(), "--identity-id is required");

            let store = open_store(database_url).await?;
            let identities = DocumentEmbeddingStore::new(store.clone());
            for identity_id in &identity_ids {
                if identities.get_profile(identity_id).await?.is_none() {
                    eprintln!("warning: {identity_id} has not enrolled a face yet");
                }
            }

            let events = DocumentEventRegistry::new(store);
            let event = events.register_identities(&event_id, identity_ids).await?;
            println!(
                "ok: {} identities registered for {}",
                event.registered_identity_ids.len(),
                event.event_id
            );
            Ok(())
        }
        "list-events" => {
            let mut database_url: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => {
                        database_url = Some(require_value(&mut args, "--database-url")?)
                    }
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let store = open_store(database_url).await?;
            let events = DocumentEventRegistry::new(store);
            for event in events.list_events().await? {
                println!(
                    "{}\t{}\t{} registered",
                    event.event_id,
                    event.title.as_deref().unwrap_or("-"),
                    event.registered_identity_ids.len()
                );
            }
            Ok(())
        }
        "export-attendance" => {
            let mut database_url: Option<String> = None;
            let mut event_id: Option<EventId> = None;
            let mut output: Option<String> = None;
            let mut format = ExportFormat::Ndjson;

            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => {
                        database_url = Some(require_value(&mut args, "--database-url")?)
                    }
                    "--event-id" => {
                        event_id = Some(EventId::new(require_value(&mut args, "--event-id")?))
                    }
                    "--output" => output = Some(require_value(&mut args, "--output")?),
                    "--format" => {
                        format = match require_value(&mut args, "--format")?.as_str() {
                            "json" => ExportFormat::Json,
                            "ndjson" => ExportFormat::Ndjson,
                            other => anyhow::bail!("invalid --format: {other}"),
                        }
                    }
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let event_id = event_id.ok_or_else(|| anyhow::anyhow!("--event-id is required"))?;
            let store = open_store(database_url).await?;
            let events = Arc::new(DocumentEventRegistry::new(store.clone()));
            if events.get_event(&event_id).await?.is_none() {
                anyhow::bail!("event not found: {event_id}");
            }
            let ledger = DocumentAttendanceLedger::new(store, events);
            let records = ledger.list_for_event(&event_id).await?;

            let mut out: Box<dyn Write> = match &output {
                Some(path) => Box::new(std::io::BufWriter::new(std::fs::File::create(path)?)),
                None => Box::new(std::io::stdout().lock()),
            };
            match format {
                ExportFormat::Json => {
                    serde_json::to_writer_pretty(&mut out, &records)?;
                    writeln!(out)?;
                }
                ExportFormat::Ndjson => {
                    for record in &records {
                        serde_json::to_writer(&mut out, record)?;
                        writeln!(out)?;
                    }
                }
            }
            out.flush()?;

            eprintln!("ok: exported {} records for {}", records.len(), event_id);
            Ok(())
        }
        other => {
            print_help();
            anyhow::bail!("unknown command: {other}")
        }
    }
}
