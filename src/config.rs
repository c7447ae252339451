//! Encrypted settings record and the master-password state machine.
//!
//! ```text
//! NoMasterPassword --set_master_password--> Unlocked
//! Unlocked --lock_session--> Locked --unlock_session--> Unlocked
//! Unlocked --remove_master_password--> NoMasterPassword
//! ```
//!
//! Without a master password the payload key is derived from a random
//! default secret, using the cheap no-password tier. The secret is kept in
//! the record sealed under the device key, so the record alone cannot be
//! opened elsewhere.
//! Every write is read-modify-encrypt-persist; the in-memory record only
//! changes after the new one is on disk.

use std::path::Path;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::crypto::{
    CostTier, DerivedKey, KdfConfig, LONG_SALT_LEN, derive_key, generate_salt, secure_random,
};
use crate::device::{DeviceKeyProvider, DeviceKeyStore, FileKeyStore};
use crate::error::Error;
use crate::keywrap::{DataKey, Kek, KeyEnvelope, KeyWrapManager, SealedPayload};
use crate::payload::{Options, Payload};
use crate::session::SessionKeyManager;
use crate::storage::Storage;

/// Schema version of [`ConfigRecord`] and [`ExportBundle`].
pub const DATA_VERSION: u32 = 1;

pub const SETTINGS_FILE: &str = "settings.json";
pub const DEVICE_KEYS_FILE: &str = "device-keys.json";

const DEFAULT_SECRET_LEN: usize = 32;

/// The persisted settings record.
#[derive(Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRecord {
    pub using_master_password: bool,
    /// base64
    pub derivation_salt: String,
    pub derivation_cost: CostTier,
    /// Random secret used as passphrase while no master password is set,
    /// sealed under the device key. `None` once a master password is set.
    pub default_password: Option<SealedPayload>,
    pub data_version: u32,
    pub encrypted_payload: SealedPayload,
}

impl ConfigRecord {
    fn salt(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.derivation_salt)
            .context("settings record has an invalid salt")
    }
}

impl std::fmt::Debug for ConfigRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigRecord")
            .field("using_master_password", &self.using_master_password)
            .field("derivation_cost", &self.derivation_cost)
            .field("data_version", &self.data_version)
            .finish_non_exhaustive()
    }
}

/// Portable copy of the payload: sealed under a fresh data key, which is
/// wrapped under the device key (unprotected) or a password-derived key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub version: u32,
    pub protected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostTier>,
    pub key_envelope: KeyEnvelope,
    pub payload: SealedPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigState {
    NoMasterPassword,
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigStatus {
    pub state: ConfigState,
    pub tier: CostTier,
    pub data_version: u32,
}

pub struct ConfigManager<S: DeviceKeyStore = FileKeyStore> {
    storage: Storage,
    device: DeviceKeyProvider<S>,
    session: SessionKeyManager,
    record: ConfigRecord,
}

impl ConfigManager<FileKeyStore> {
    /// Opens (or creates) the settings record and device key store in `dir`.
    pub fn open_in(dir: &Path, kdf: KdfConfig) -> Result<Self> {
        let storage = Storage::new(dir.join(SETTINGS_FILE));
        let keys = FileKeyStore::new(Storage::new(dir.join(DEVICE_KEYS_FILE)));
        Self::open(storage, keys, kdf)
    }
}

impl<S: DeviceKeyStore> ConfigManager<S> {
    /// Loads the record, or writes a fresh password-less one on first run.
    pub fn open(storage: Storage, device_store: S, kdf: KdfConfig) -> Result<Self> {
        let mut session = SessionKeyManager::new(kdf);
        let mut device = DeviceKeyProvider::new(device_store);

        let record = match storage.load_if_exists()? {
            Some(data) => {
                let record: ConfigRecord =
                    serde_json::from_slice(&data).context("settings record is corrupted")?;
                if record.data_version > DATA_VERSION {
                    return Err(Error::UnsupportedDataVersion(record.data_version).into());
                }
                record
            }
            None => {
                let record = first_run_record(&mut session, &mut device)?;
                storage
                    .save(&serde_json::to_vec_pretty(&record)?)
                    .context("failed to write settings record")?;
                info!(path = %storage.path().display(), "created settings record");
                record
            }
        };

        let mut manager = Self {
            storage,
            device,
            session,
            record,
        };
        if !manager.record.using_master_password {
            manager.ensure_key()?;
        }
        Ok(manager)
    }

    pub fn state(&self) -> ConfigState {
        if !self.record.using_master_password {
            return ConfigState::NoMasterPassword;
        }
        match self.record.salt() {
            Ok(salt) if self.session.get(&salt, self.record.derivation_cost).is_some() => {
                ConfigState::Unlocked
            }
            _ => ConfigState::Locked,
        }
    }

    pub fn status(&self) -> ConfigStatus {
        ConfigStatus {
            state: self.state(),
            tier: self.record.derivation_cost,
            data_version: self.record.data_version,
        }
    }

    pub fn record(&self) -> &ConfigRecord {
        &self.record
    }

    /// Decrypts and returns the current payload.
    pub fn payload(&mut self) -> Result<Payload> {
        self.ensure_key()?;
        let plaintext = self.record.encrypted_payload.open(self.key()?.as_bytes())?;
        serde_json::from_slice(&plaintext).context("settings payload is corrupted")
    }

    pub fn slot_value(&mut self, index: usize) -> Result<String> {
        Ok(self.payload()?.slot(index)?.value().to_string())
    }

    pub fn set_slot_value(&mut self, index: usize, value: &str) -> Result<()> {
        self.update(|payload| payload.set_slot_value(index, value))
    }

    pub fn set_slot_name(&mut self, index: usize, name: &str) -> Result<()> {
        self.update(|payload| payload.set_slot_name(index, name))
    }

    pub fn set_options(&mut self, options: Options) -> Result<()> {
        self.update(|payload| payload.set_options(options))
    }

    /// Re-encrypts the payload under a key derived from `password` with a
    /// fresh salt. Accepted without a master password and while unlocked
    /// (password change).
    pub fn set_master_password(&mut self, password: &str, tier: CostTier) -> Result<()> {
        if password.is_empty() {
            bail!("password cannot be empty");
        }
        if tier.header_class().is_none() {
            bail!("master password requires the low, middle or high tier");
        }

        let payload = self.payload()?;
        let salt = generate_salt(LONG_SALT_LEN)?;
        let key = derive_key(password.as_bytes(), &salt, tier, self.session.kdf())?;

        self.replace_record(&payload, true, salt, tier, None, key)?;
        info!(%tier, "master password set");
        Ok(())
    }

    /// Derives the key for `password` and proves it by decrypting the payload.
    ///
    /// The key is cached only once the payload opens, so a wrong password
    /// leaves an unlocked session unlocked.
    pub fn unlock_session(&mut self, password: &str) -> Result<()> {
        if !self.record.using_master_password {
            return Err(Error::NoMasterPassword.into());
        }

        let salt = self.record.salt()?;
        let tier = self.record.derivation_cost;
        let key = derive_key(password.as_bytes(), &salt, tier, self.session.kdf())?;

        if self.record.encrypted_payload.open(key.as_bytes()).is_err() {
            return Err(Error::Authentication.into());
        }
        self.session.store(&salt, tier, key);
        debug!("session unlocked");
        Ok(())
    }

    pub fn lock_session(&mut self) {
        self.session.clear();
        debug!("session locked");
    }

    /// Returns to password-less mode with a new default secret and salt.
    pub fn remove_master_password(&mut self) -> Result<()> {
        if !self.record.using_master_password {
            return Err(Error::NoMasterPassword.into());
        }

        let payload = self.payload()?;
        let secret = generate_default_secret()?;
        let sealed_secret = seal_secret(&mut self.device, &secret)?;
        let salt = generate_salt(LONG_SALT_LEN)?;
        let key = derive_key(
            secret.as_bytes(),
            &salt,
            CostTier::NoPassword,
            self.session.kdf(),
        )?;

        self.replace_record(
            &payload,
            false,
            salt,
            CostTier::NoPassword,
            Some(sealed_secret),
            key,
        )?;
        info!("master password removed");
        Ok(())
    }

    /// Seals a copy of the payload for backup or transfer.
    ///
    /// With a password the bundle can be restored anywhere; without one it is
    /// bound to this device's key.
    pub fn export_config(&mut self, password: Option<&str>) -> Result<ExportBundle> {
        let payload = self.payload()?;
        let plaintext = Zeroizing::new(serde_json::to_vec(&payload)?);

        let data_key = DataKey::generate()?;
        let sealed = SealedPayload::seal(data_key.as_bytes(), &plaintext)?;

        let (kek, salt, cost) = match password {
            Some(password) => {
                let tier = payload.options().tier;
                let (kek, salt) = self.password_kek(password, tier)?;
                (kek, Some(STANDARD.encode(salt)), Some(tier))
            }
            None => (self.device.get_or_create()?, None, None),
        };

        Ok(ExportBundle {
            version: DATA_VERSION,
            protected: password.is_some(),
            salt,
            cost,
            key_envelope: KeyWrapManager::wrap(&data_key, &kek)?,
            payload: sealed,
        })
    }

    /// Replaces the current payload with the bundle's content.
    pub fn import_config(&mut self, bundle: &ExportBundle, password: Option<&str>) -> Result<()> {
        self.ensure_key()?;

        let kek = self.bundle_kek(bundle, password)?;
        let unwrapped = KeyWrapManager::unwrap(&bundle.key_envelope, &kek);
        let data_key = device_bound(bundle, unwrapped)?;
        let plaintext = bundle.payload.open(data_key.as_bytes())?;
        let payload: Payload =
            serde_json::from_slice(&plaintext).context("imported payload is corrupted")?;

        self.write_payload(&payload)?;
        info!(protected = bundle.protected, "imported settings");
        Ok(())
    }

    /// Re-wraps a bundle's data key under `new_password`. The sealed payload
    /// is carried over unchanged.
    pub fn reprotect_export(
        &mut self,
        bundle: &ExportBundle,
        old_password: Option<&str>,
        new_password: &str,
        tier: CostTier,
    ) -> Result<ExportBundle> {
        if new_password.is_empty() {
            bail!("password cannot be empty");
        }
        let old = self.bundle_kek(bundle, old_password)?;
        let (new, salt) = self.password_kek(new_password, tier)?;

        Ok(ExportBundle {
            version: DATA_VERSION,
            protected: true,
            salt: Some(STANDARD.encode(salt)),
            cost: Some(tier),
            key_envelope: device_bound(
                bundle,
                KeyWrapManager::rewrap(&bundle.key_envelope, &old, &new),
            )?,
            payload: bundle.payload.clone(),
        })
    }

    fn bundle_kek(&self, bundle: &ExportBundle, password: Option<&str>) -> Result<Kek> {
        if bundle.version > DATA_VERSION {
            return Err(Error::UnsupportedDataVersion(bundle.version).into());
        }

        if !bundle.protected {
            return self
                .device
                .get()?
                .context("bundle is bound to another device");
        }

        let password = password.context("bundle is password protected")?;
        let salt = bundle
            .salt
            .as_deref()
            .map(|s| STANDARD.decode(s))
            .transpose()
            .map_err(|_| Error::Authentication)?
            .context("protected bundle has no salt")?;
        let tier = bundle.cost.context("protected bundle has no cost tier")?;

        let key = derive_key(password.as_bytes(), &salt, tier, self.session.kdf())?;
        Ok(Kek::from(key))
    }

    fn password_kek(&self, password: &str, tier: CostTier) -> Result<(Kek, Vec<u8>)> {
        if tier.header_class().is_none() {
            bail!("password protection requires the low, middle or high tier");
        }
        let salt = generate_salt(LONG_SALT_LEN)?;
        let key = derive_key(password.as_bytes(), &salt, tier, self.session.kdf())?;
        Ok((Kek::from(key), salt))
    }

    fn update<F>(&mut self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Payload) -> crate::Result<()>,
    {
        let mut payload = self.payload()?;
        mutate(&mut payload)?;
        self.write_payload(&payload)
    }

    fn write_payload(&mut self, payload: &Payload) -> Result<()> {
        let plaintext = Zeroizing::new(serde_json::to_vec(payload)?);
        let sealed = SealedPayload::seal(self.key()?.as_bytes(), &plaintext)?;

        let mut record = self.record.clone();
        record.encrypted_payload = sealed;
        self.persist(record)
    }

    fn replace_record(
        &mut self,
        payload: &Payload,
        using_master_password: bool,
        salt: Vec<u8>,
        tier: CostTier,
        default_password: Option<SealedPayload>,
        key: DerivedKey,
    ) -> Result<()> {
        let plaintext = Zeroizing::new(serde_json::to_vec(payload)?);
        let record = ConfigRecord {
            using_master_password,
            derivation_salt: STANDARD.encode(&salt),
            derivation_cost: tier,
            default_password,
            data_version: DATA_VERSION,
            encrypted_payload: SealedPayload::seal(key.as_bytes(), &plaintext)?,
        };

        self.persist(record)?;
        self.session.store(&salt, tier, key);
        Ok(())
    }

    fn persist(&mut self, record: ConfigRecord) -> Result<()> {
        let data = Zeroizing::new(serde_json::to_vec_pretty(&record)?);
        self.storage
            .save(&data)
            .context("failed to write settings record")?;
        self.record = record;
        Ok(())
    }

    /// Makes sure the session key for the current record is cached.
    fn ensure_key(&mut self) -> Result<()> {
        let salt = self.record.salt()?;
        let tier = self.record.derivation_cost;
        if self.session.get(&salt, tier).is_some() {
            return Ok(());
        }
        if self.record.using_master_password {
            return Err(Error::SessionLocked.into());
        }

        let sealed = self
            .record
            .default_password
            .as_ref()
            .context("settings record has no default secret")?;
        let kek = self
            .device
            .get()?
            .context("device key is missing; settings were created on another device")?;
        let secret = sealed.open(kek.as_bytes())?;
        self.session.derive_and_cache(&secret, &salt, tier)?;
        Ok(())
    }

    fn key(&self) -> Result<&DerivedKey> {
        let salt = self.record.salt()?;
        self.session
            .get(&salt, self.record.derivation_cost)
            .ok_or_else(|| Error::SessionLocked.into())
    }
}

/// Unprotected bundles only unwrap under the key of the device that made them.
fn device_bound<T>(bundle: &ExportBundle, result: crate::Result<T>) -> Result<T> {
    if bundle.protected {
        Ok(result?)
    } else {
        result.context("bundle is bound to another device")
    }
}

fn generate_default_secret() -> Result<Zeroizing<String>> {
    let mut bytes = Zeroizing::new([0u8; DEFAULT_SECRET_LEN]);
    secure_random(&mut bytes[..])?;
    Ok(Zeroizing::new(STANDARD.encode(&bytes[..])))
}

fn seal_secret<S: DeviceKeyStore>(
    device: &mut DeviceKeyProvider<S>,
    secret: &str,
) -> Result<SealedPayload> {
    let kek = device.get_or_create()?;
    Ok(SealedPayload::seal(kek.as_bytes(), secret.as_bytes())?)
}

fn first_run_record<S: DeviceKeyStore>(
    session: &mut SessionKeyManager,
    device: &mut DeviceKeyProvider<S>,
) -> Result<ConfigRecord> {
    let secret = generate_default_secret()?;
    let sealed_secret = seal_secret(device, &secret)?;
    let salt = generate_salt(LONG_SALT_LEN)?;
    let key = session.derive_and_cache(secret.as_bytes(), &salt, CostTier::NoPassword)?;

    let plaintext = Zeroizing::new(serde_json::to_vec(&Payload::new())?);
    Ok(ConfigRecord {
        using_master_password: false,
        derivation_salt: STANDARD.encode(&salt),
        derivation_cost: CostTier::NoPassword,
        default_password: Some(sealed_secret),
        data_version: DATA_VERSION,
        encrypted_payload: SealedPayload::seal(key.as_bytes(), &plaintext)?,
    })
}
