use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
mod auth;
use sealbox::config::SETTINGS_FILE;
use sealbox::payload::Options;
use sealbox::{
    Algorithm, ConfigManager, ConfigState, CostTier, EncryptionService, ExportBundle, KdfConfig,
    SaltLength, ServiceConfig, Storage, default_home,
};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, clap::Args)]
struct Argon2Args {
    /// Argon2 memory cost in KiB (default: 65536); must match between encrypt and decrypt
    #[arg(long = "argon-mem", global = true, env = "SEALBOX_ARGON_MEM")]
    mem_cost_kib: Option<u32>,

    /// Argon2 parallelism (default: 1); must match between encrypt and decrypt
    #[arg(long = "argon-parallelism", global = true, env = "SEALBOX_ARGON_PARALLELISM")]
    parallelism: Option<u32>,
}

impl Argon2Args {
    fn to_kdf_config(&self) -> Result<KdfConfig> {
        let default = KdfConfig::default();

        Ok(KdfConfig::new(
            self.mem_cost_kib.unwrap_or(default.mem_cost_kib()),
            self.parallelism.unwrap_or(default.parallelism()),
        )?)
    }
}

#[derive(Debug, clap::Args)]
struct EncryptArgs {
    /// Cipher suite: aes-256-gcm, chacha20-poly1305 (legacy: aes-256-ctr, xor)
    #[arg(long)]
    algorithm: Option<Algorithm>,

    /// Key derivation cost: low, middle or high
    #[arg(long)]
    tier: Option<CostTier>,

    /// Salt length: short (12 bytes) or long (16 bytes)
    #[arg(long)]
    salt: Option<SaltLength>,

    /// Plaintext bytes per frame
    #[arg(long)]
    chunk_size: Option<usize>,
}

impl EncryptArgs {
    fn apply(&self, mut options: Options) -> Options {
        if let Some(algorithm) = self.algorithm {
            options.algorithm = algorithm;
        }
        if let Some(tier) = self.tier {
            options.tier = tier;
        }
        if let Some(salt) = self.salt {
            options.salt_length = salt;
        }
        if let Some(chunk_size) = self.chunk_size {
            options.chunk_size = chunk_size;
        }
        options
    }

    fn is_empty(&self) -> bool {
        self.algorithm.is_none()
            && self.tier.is_none()
            && self.salt.is_none()
            && self.chunk_size.is_none()
    }
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "sealbox")]
#[command(
    version,
    about = "Passphrase-based text and file encryption with an encrypted settings store."
)]
struct Cli {
    /// Directory of the settings record and device key store
    #[arg(long, global = true, value_name = "DIR", env = "SEALBOX_HOME")]
    home: Option<PathBuf>,

    /// Log output format on stderr
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(flatten)]
    argon2: Argon2Args,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Encrypts a string and prints the base64 container
    #[command(arg_required_else_help = true)]
    EncryptText {
        text: String,
        #[command(flatten)]
        options: EncryptArgs,
        /// Copy the result to the clipboard instead of printing it
        #[arg(long)]
        copy: bool,
    },

    /// Decrypts a base64 text container
    #[command(arg_required_else_help = true)]
    DecryptText {
        text: String,
        /// Copy the result to the clipboard instead of printing it
        #[arg(long)]
        copy: bool,
    },

    /// Encrypts a file into a container
    #[command(arg_required_else_help = true)]
    EncryptFile {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        options: EncryptArgs,
        /// Overwrite the output file if it exists
        #[arg(short, long)]
        force: bool,
    },

    /// Decrypts a file container
    #[command(arg_required_else_help = true)]
    DecryptFile {
        input: PathBuf,
        output: PathBuf,
        /// Overwrite the output file if it exists
        #[arg(short, long)]
        force: bool,
    },

    /// Shows the header of a file container
    #[command(arg_required_else_help = true)]
    Inspect { input: PathBuf },

    /// Manages the encrypted settings store
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Shows whether a master password is set
    Status,

    /// Sets or changes the master password
    SetPassword {
        /// Key derivation cost: low, middle or high
        #[arg(long, default_value = "middle")]
        tier: CostTier,
    },

    /// Removes the master password
    RemovePassword,

    /// Lists slot names
    Slots,

    /// Prints a slot value
    #[command(arg_required_else_help = true)]
    Get {
        index: usize,
        /// Copy the value to the clipboard instead of printing it
        #[arg(long)]
        copy: bool,
    },

    /// Stores a value in a slot
    #[command(arg_required_else_help = true)]
    Set { index: usize, value: String },

    /// Renames a slot
    #[command(arg_required_else_help = true)]
    Rename { index: usize, name: String },

    /// Shows or changes the saved encryption options
    Options {
        #[command(flatten)]
        options: EncryptArgs,
    },

    /// Writes the settings to a bundle file
    #[command(arg_required_else_help = true)]
    Export {
        output: PathBuf,
        /// Protect the bundle with a password instead of this device's key
        #[arg(long)]
        protect: bool,
    },

    /// Replaces the settings with a bundle's content
    #[command(arg_required_else_help = true)]
    Import { input: PathBuf },

    /// Re-protects a bundle under a new password
    #[command(arg_required_else_help = true)]
    Reprotect {
        input: PathBuf,
        output: PathBuf,
        /// Key derivation cost: low, middle or high
        #[arg(long, default_value = "middle")]
        tier: CostTier,
    },
}

fn init_logging(format: &LogFormat) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_env("SEALBOX_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let layer = fmt::layer().with_writer(std::io::stderr);

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .init(),
    }
}

fn resolve_home(home: Option<PathBuf>) -> Result<PathBuf> {
    match home {
        Some(p) => Ok(p),
        None => default_home(),
    }
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Cli::parse();
    init_logging(&args.log_format);

    let kdf = args.argon2.to_kdf_config()?;
    let home = resolve_home(args.home)?;

    match args.command {
        Commands::EncryptText {
            text,
            options,
            copy,
        } => {
            let service = encryption_service(&home, kdf, &options)?;
            let password = auth::read_password()?;
            let container = service.encrypt_text(&text, password.as_bytes())?;
            emit(&container, copy)?;
        }
        Commands::DecryptText { text, copy } => {
            let service = EncryptionService::new(kdf, ServiceConfig::default());
            let password = auth::read_password()?;
            let plaintext = service.decrypt_text(&text, password.as_bytes())?;
            emit(&plaintext, copy)?;
        }
        Commands::EncryptFile {
            input,
            output,
            options,
            force,
        } => {
            let service = encryption_service(&home, kdf, &options)?;
            let password = auth::read_password()?;
            let summary = with_output(&input, &output, force, |reader, writer| {
                Ok(service.encrypt_file(reader, writer, password.as_bytes())?)
            })?;
            println!(
                "encrypted {} bytes into {} frames",
                summary.bytes_in, summary.frames
            );
        }
        Commands::DecryptFile {
            input,
            output,
            force,
        } => {
            let service = EncryptionService::new(kdf, ServiceConfig::default());
            let password = auth::read_password()?;
            let summary = with_output(&input, &output, force, |reader, writer| {
                Ok(service.decrypt_file(reader, writer, password.as_bytes())?)
            })?;
            if summary.dropped_bytes > 0 {
                eprintln!(
                    "warning: ignored {} trailing bytes after the last frame",
                    summary.dropped_bytes
                );
            }
            println!("decrypted {} bytes", summary.bytes_out);
        }
        Commands::Inspect { input } => {
            let mut file = File::open(&input)
                .with_context(|| format!("failed to open {}", input.display()))?;
            let header = EncryptionService::read_header(&mut file)?;
            let algorithm = header.algorithm();

            println!("Algorithm      : {algorithm}");
            if algorithm.is_legacy() {
                println!("                 (legacy, not recommended)");
            }
            println!("Format version : {}", header.version());
            println!("Cost tier      : {}", header.tier());
            println!("Salt length    : {} bytes", header.salt().len());
            println!("Header length  : {} bytes", header.len());
        }
        Commands::Config(command) => run_config(command, &home, kdf)?,
    }

    Ok(())
}

fn run_config(command: ConfigCommand, home: &Path, kdf: KdfConfig) -> Result<()> {
    let mut cm = ConfigManager::open_in(home, kdf)?;

    match command {
        ConfigCommand::Status => {
            let status = cm.status();
            let state = match status.state {
                ConfigState::NoMasterPassword => "no master password",
                ConfigState::Locked => "locked",
                ConfigState::Unlocked => "unlocked",
            };
            println!("State        : {state}");
            println!("Cost tier    : {}", status.tier);
            println!("Data version : {}", status.data_version);
            println!("Location     : {}", home.display());
        }
        ConfigCommand::SetPassword { tier } => {
            unlock(&mut cm)?;
            let password = auth::read_new_password_with_confirmation()?;
            cm.set_master_password(&password, tier)?;
            println!("master password set");
        }
        ConfigCommand::RemovePassword => {
            unlock(&mut cm)?;
            cm.remove_master_password()?;
            println!("master password removed");
        }
        ConfigCommand::Slots => {
            unlock(&mut cm)?;
            let payload = cm.payload()?;

            let name_width = payload
                .slots()
                .map(|s| s.name().len())
                .chain(std::iter::once("Name".len()))
                .max()
                .unwrap_or_default();

            println!("{:>2}  {:<name_width$}  Updated", "#", "Name");
            println!("{:->2}  {:-<name_width$}  {:-<7}", "", "", "");
            for (i, slot) in payload.slots().enumerate() {
                let updated = if slot.is_empty() {
                    "-"
                } else {
                    slot.updated().unwrap_or("-")
                };
                println!("{i:>2}  {:<name_width$}  {updated}", slot.name());
            }
        }
        ConfigCommand::Get { index, copy } => {
            unlock(&mut cm)?;
            let value = zeroize::Zeroizing::new(cm.slot_value(index)?);
            emit(&value, copy)?;
        }
        ConfigCommand::Set { index, value } => {
            unlock(&mut cm)?;
            cm.set_slot_value(index, &value)?;
            println!("stored slot {index}");
        }
        ConfigCommand::Rename { index, name } => {
            unlock(&mut cm)?;
            cm.set_slot_name(index, &name)?;
            println!("renamed slot {index} to '{name}'");
        }
        ConfigCommand::Options { options } => {
            unlock(&mut cm)?;
            let current = *cm.payload()?.options();
            let updated = options.apply(current);
            if !options.is_empty() {
                cm.set_options(updated)?;
            }
            println!("Algorithm   : {}", updated.algorithm);
            println!("Cost tier   : {}", updated.tier);
            println!("Salt length : {} bytes", updated.salt_length.len());
            println!("Chunk size  : {} bytes", updated.chunk_size);
        }
        ConfigCommand::Export { output, protect } => {
            unlock(&mut cm)?;
            let bundle = if protect {
                let password = auth::read_new_bundle_password()?;
                cm.export_config(Some(password.as_str()))?
            } else {
                cm.export_config(None)?
            };
            write_bundle(&output, &bundle)?;
            println!("exported settings to {}", output.display());
        }
        ConfigCommand::Import { input } => {
            let bundle = read_bundle(&input)?;
            unlock(&mut cm)?;
            if bundle.protected {
                let password = auth::read_bundle_password()?;
                cm.import_config(&bundle, Some(password.as_str()))?;
            } else {
                cm.import_config(&bundle, None)?;
            }
            println!("imported settings from {}", input.display());
        }
        ConfigCommand::Reprotect {
            input,
            output,
            tier,
        } => {
            let bundle = read_bundle(&input)?;
            let old = if bundle.protected {
                Some(auth::read_bundle_password()?)
            } else {
                None
            };
            let new = auth::read_new_password_with_confirmation()?;
            let old = old.as_ref().map(|pw| pw.as_str());
            let reprotected = cm.reprotect_export(&bundle, old, &new, tier)?;
            write_bundle(&output, &reprotected)?;
            println!("wrote password-protected bundle to {}", output.display());
        }
    }

    Ok(())
}

/// Prompts for the master password if the store is locked.
fn unlock(cm: &mut ConfigManager) -> Result<()> {
    if cm.state() == ConfigState::Locked {
        let password = auth::read_password()?;
        cm.unlock_session(&password)?;
    }
    Ok(())
}

/// Saved options fill in whatever the flags leave out, as long as the store
/// can be read without a password.
fn encryption_service(
    home: &Path,
    kdf: KdfConfig,
    args: &EncryptArgs,
) -> Result<EncryptionService> {
    let saved = if home.join(SETTINGS_FILE).exists() {
        match saved_options(home, kdf) {
            Ok(options) => options,
            Err(err) => {
                warn!("cannot read saved options, using defaults: {err:#}");
                None
            }
        }
    } else {
        None
    };

    let options = args.apply(saved.unwrap_or_default());
    if options.tier == CostTier::NoPassword {
        bail!("the no-password tier cannot be used for encryption");
    }
    Ok(EncryptionService::new(kdf, options.service_config()))
}

fn saved_options(home: &Path, kdf: KdfConfig) -> Result<Option<Options>> {
    let mut cm = ConfigManager::open_in(home, kdf)?;
    match cm.state() {
        ConfigState::NoMasterPassword => Ok(Some(*cm.payload()?.options())),
        _ => {
            debug!("settings store is locked, using default options");
            Ok(None)
        }
    }
}

/// Runs `f` from `input` into a new `output`, deleting the output again if
/// `f` fails or the process is interrupted.
fn with_output<T>(
    input: &Path,
    output: &Path,
    force: bool,
    f: impl FnOnce(BufReader<File>, &mut BufWriter<File>) -> Result<T>,
) -> Result<T> {
    if input == output {
        bail!("input and output must be different files");
    }

    let reader = BufReader::new(
        File::open(input).with_context(|| format!("failed to open {}", input.display()))?,
    );

    let mut options = OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    let file = options
        .open(output)
        .with_context(|| format!("failed to create {}", output.display()))?;

    let partial = output.to_path_buf();
    ctrlc::set_handler(move || {
        let _ = fs::remove_file(&partial);
        std::process::exit(130);
    })
    .context("failed to install Ctrl-C handler")?;

    let mut writer = BufWriter::new(file);
    let result = f(reader, &mut writer).and_then(|value| {
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(value)
    });

    if result.is_err() {
        drop(writer);
        let _ = fs::remove_file(output);
    }
    result
}

fn emit(text: &str, copy: bool) -> Result<()> {
    if copy {
        let mut clipboard = arboard::Clipboard::new().context("clipboard unavailable")?;
        clipboard
            .set_text(text.to_owned())
            .context("failed to copy to clipboard")?;
        eprintln!("copied to clipboard");
    } else {
        println!("{text}");
    }
    Ok(())
}

fn write_bundle(path: &Path, bundle: &ExportBundle) -> Result<()> {
    let json = serde_json::to_vec_pretty(bundle)?;
    Storage::new(path.to_path_buf()).save(&json)
}

fn read_bundle(path: &Path) -> Result<ExportBundle> {
    let data = Storage::new(path.to_path_buf()).load()?;
    serde_json::from_slice(&data).context("not a settings bundle")
}
