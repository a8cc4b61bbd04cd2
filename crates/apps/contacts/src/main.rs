//! contacts - Personal address book synced from Google Contacts
//!
//! Records live as vCard files under the config directory
//! (`$CONTACTS_DIR` or `~/.config/contacts`).

mod completion;
mod output;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use log::{error, info, warn};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use contacts::{
    ClientSecrets, ContactId, ContactProvider, ContactStore, CredentialStore, GoogleAuth,
    GoogleContactsProvider, GoogleCredentials, sync_contacts,
};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "contacts", about = "Manage your contacts", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save Google OAuth client credentials and authorize access
    ///
    /// Create an OAuth client (Desktop app) in the Google Cloud Console,
    /// enable the People API and add http://localhost:8080/callback as a
    /// redirect URI. Without flags the client is read from
    /// GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET.
    Init {
        #[arg(long, requires = "client_secret", conflicts_with = "credentials_file")]
        client_id: Option<String>,

        #[arg(long, requires = "client_id")]
        client_secret: Option<String>,

        /// Client secrets JSON downloaded from the Google Cloud Console
        #[arg(long)]
        credentials_file: Option<PathBuf>,

        /// Seconds to wait for the browser redirect
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },

    /// Re-run authorization with the stored client credentials
    Auth {
        /// Seconds to wait for the browser redirect
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },

    /// Sync contacts from Google
    Sync,

    /// List all contacts
    List {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Show a contact by name or UID
    Get {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,

        #[arg(required = true)]
        query: Vec<String>,
    },

    /// Delete a contact by name or UID
    Delete {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        #[arg(required = true)]
        query: Vec<String>,
    },

    /// Forget stored tokens, keeping the OAuth client
    Logout,

    /// Print a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Print contact names starting with a prefix, one per line
    #[command(hide = true)]
    Names { prefix: Option<String> },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let dir = config::init().context("Failed to initialize config directory")?;

    let result = match cli.command {
        Commands::Init {
            client_id,
            client_secret,
            credentials_file,
            timeout,
        } => init(&dir, client_id, client_secret, credentials_file, timeout),
        Commands::Auth { timeout } => authorize(&auth_for(&dir)?, timeout),
        Commands::Sync => sync(&dir),
        Commands::List { output } => list(&dir, output),
        Commands::Get { output, query } => get(&dir, output, &query.join(" ")),
        Commands::Delete { yes, query } => delete(&dir, yes, &query.join(" ")),
        Commands::Logout => logout(&dir),
        Commands::Completions { shell } => completion::print(shell),
        Commands::Names { prefix } => names(&dir, prefix.as_deref().unwrap_or_default()),
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

fn auth_for(dir: &Path) -> Result<GoogleAuth> {
    Ok(GoogleAuth::new(CredentialStore::new(dir)?))
}

fn init(
    dir: &Path,
    client_id: Option<String>,
    client_secret: Option<String>,
    credentials_file: Option<PathBuf>,
    timeout: u64,
) -> Result<()> {
    let secrets = match (client_id, client_secret, credentials_file) {
        (Some(id), Some(secret), _) => ClientSecrets::new(id, secret)?,
        (_, _, Some(path)) => ClientSecrets::from_file(&path)?,
        _ => ClientSecrets::from_env().context(
            "No client credentials given: pass --client-id/--client-secret, \
             --credentials-file, or set GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET",
        )?,
    };

    let store = CredentialStore::new(dir)?;
    if let Ok(existing) = store.load() {
        warn!("Replacing existing client {}", existing.client_id);
    }
    store.save(&GoogleCredentials::from_secrets(secrets))?;
    info!("Saved client credentials to {}", store.credentials_path().display());

    authorize(&GoogleAuth::new(store), timeout)
}

fn authorize(auth: &GoogleAuth, timeout: u64) -> Result<()> {
    let pending = auth.authorize()?;

    eprintln!(
        "Opening browser for authorization...\nIf it doesn't open, visit:\n\n  {}\n",
        pending.auth_url()
    );
    if let Err(e) = open::that(pending.auth_url()) {
        warn!("Failed to open browser: {}. Please open the URL manually.", e);
    }

    let creds = pending
        .wait_timeout(Duration::from_secs(timeout))
        .context("Authorization failed")?;

    match &creds.email {
        Some(email) => eprintln!("Authorized as {}. Run 'contacts sync' to sync.", email),
        None => eprintln!("Authorized. Run 'contacts sync' to sync."),
    }
    Ok(())
}

/// Open the store with the Google provider attached
fn connected_store(dir: &Path) -> Result<(Arc<GoogleContactsProvider>, ContactStore)> {
    let auth = auth_for(dir)?;
    if !auth.is_authenticated() {
        bail!("Not authorized. Run 'contacts init' first");
    }
    let provider = Arc::new(GoogleContactsProvider::new(auth)?);
    let store = ContactStore::new(dir, Some(provider.clone() as Arc<dyn ContactProvider>))?;
    Ok((provider, store))
}

fn sync(dir: &Path) -> Result<()> {
    let (provider, store) = connected_store(dir)?;
    if provider.sync_token().is_some() {
        log::debug!("Stored sync cursor present; performing full fetch");
    }

    eprintln!("Syncing contacts...");
    let stats = sync_contacts(provider.as_ref(), &store)?;
    let total = store.list()?.len();
    eprintln!(
        "Sync complete. {} fetched, {} contacts in {}ms.",
        stats.contacts_fetched, total, stats.duration_ms
    );
    Ok(())
}

fn list(dir: &Path, format: OutputFormat) -> Result<()> {
    let store = ContactStore::new(dir, None)?;
    let mut contacts = store.list()?;
    contacts.sort_by_key(|c| c.full_name().to_lowercase());
    output::print_list(&contacts, format)
}

fn get(dir: &Path, format: OutputFormat, query: &str) -> Result<()> {
    let store = ContactStore::new(dir, None)?;
    let contact = store
        .resolve(query)?
        .with_context(|| format!("Contact not found: {}", query))?;
    output::print_one(&contact, format)
}

fn delete(dir: &Path, yes: bool, query: &str) -> Result<()> {
    let store = match connected_store(dir) {
        Ok((_, store)) => store,
        Err(e) => {
            warn!("{:#}; deleting the local copy only", e);
            ContactStore::new(dir, None)?
        }
    };

    let contact = store
        .resolve(query)?
        .with_context(|| format!("Contact not found: {}", query))?;
    let id: ContactId = contact
        .uid()
        .cloned()
        .with_context(|| format!("Contact has no identifier: {}", query))?;

    if !yes && !confirm(&format!("Delete {:?}?", contact.full_name()))? {
        eprintln!("Cancelled.");
        return Ok(());
    }

    store.delete(&id)?;
    eprintln!("Deleted.");
    Ok(())
}

fn logout(dir: &Path) -> Result<()> {
    let auth = auth_for(dir)?;
    auth.logout()?;
    eprintln!("Logged out. Run 'contacts auth' to authorize again.");
    Ok(())
}

/// Completion helper: prints nothing when the store cannot be read
fn names(dir: &Path, prefix: &str) -> Result<()> {
    let store = ContactStore::new(dir, None)?;
    let mut out = io::stdout().lock();
    for name in store.names_with_prefix(prefix).unwrap_or_default() {
        writeln!(out, "{}", name)?;
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{} [y/N] ", prompt);
    io::stderr().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}
