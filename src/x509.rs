//! Device identity certificate adapter
//!
//! `X509Context` owns everything an identity session needs: the backend
//! binding, the init counter and the configuration naming the device CA.
//! Each operation checks the init counter, resolves the backend and forwards;
//! no cryptography happens here. Backend work runs with the init counter
//! locked, so concurrent `init`/`deinit` calls wait for it.
//!
//! A context serves exactly one device identity. `destroy` always targets the
//! device CA alias reported by the context's `AliasLookup`, whatever handle it
//! is given. By default that lookup is the configuration itself.
//!
//! # Lifecycle
//!
//! ```text
//! init ──► create ──► get_cert / get_key / get_common_name / sign ──► destroy ──► deinit
//! ```
//!
//! `interface()` returns the same operations as a static table of function
//! pointers. It needs no initialization.

use std::sync::Arc;

use crate::backend::{CryptoBackend, CryptoBackendBinding, HsmBuffer};
use crate::certificate::{CertificateInfo, CertificateProperties};
use crate::config::{AliasLookup, X509Config};
use crate::error::{X509Error, X509Result};
use crate::lifecycle::Lifecycle;

pub struct X509Context {
    binding: CryptoBackendBinding,
    lifecycle: Lifecycle,
    config: X509Config,
    aliases: Arc<dyn AliasLookup>,
}

impl X509Context {
    pub fn new(backend: Arc<dyn CryptoBackend>, config: X509Config) -> Self {
        Self::with_binding(CryptoBackendBinding::new(backend), config)
    }

    /// Build a context whose backend comes from a capability lookup.
    pub fn from_lookup<F>(lookup: F, config: X509Config) -> Self
    where
        F: FnOnce() -> Arc<dyn CryptoBackend>,
    {
        Self::with_binding(CryptoBackendBinding::from_lookup(lookup), config)
    }

    fn with_binding(binding: CryptoBackendBinding, config: X509Config) -> Self {
        Self {
            binding,
            lifecycle: Lifecycle::new(),
            aliases: Arc::new(config.clone()),
            config,
        }
    }

    /// Resolve the device CA alias through `aliases` instead of the config.
    pub fn with_alias_lookup(mut self, aliases: Arc<dyn AliasLookup>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn config(&self) -> &X509Config {
        &self.config
    }

    pub fn device_ca_alias(&self) -> &str {
        self.aliases.device_ca_alias()
    }

    /// Config properties addressed at the looked-up alias. A self-signed
    /// config stays self-signed under the new alias.
    fn device_ca_properties(&self) -> CertificateProperties {
        let alias = self.device_ca_alias();
        let props = self.config.device_ca_properties().with_alias(alias);
        if self.config.issuer_alias == self.config.device_ca_alias {
            props.with_issuer_alias(alias)
        } else {
            props
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn init(&self) -> X509Result<()> {
        self.lifecycle.init(&self.binding)
    }

    pub fn deinit(&self) {
        self.lifecycle.deinit(&self.binding)
    }

    pub fn is_initialized(&self) -> bool {
        self.lifecycle.is_initialized()
    }

    pub fn init_count(&self) -> usize {
        self.lifecycle.count()
    }

    /// Point this context at another backend. Takes effect on the next call.
    ///
    /// Rebinding to the backend already bound changes nothing. While
    /// initialized, a new backend is initialized before the switch and the
    /// old one torn down after it; if the new backend fails to initialize
    /// the context keeps its current backend.
    pub fn rebind(&self, backend: Arc<dyn CryptoBackend>) -> X509Result<()> {
        self.lifecycle.with_count(|count| -> X509Result<()> {
            let previous = self.binding.bind();
            if same_backend(&previous, &backend) {
                log::debug!("Rebind to the current backend ignored");
                return Ok(());
            }

            if count == 0 {
                self.binding.rebind(backend);
                return Ok(());
            }

            backend.init().map_err(|e| {
                log::warn!("Replacement backend init failed: {}", e);
                X509Error::BackendInit(e.to_string())
            })?;
            self.binding.rebind(backend);
            previous.deinit();
            log::info!("Crypto backend replaced");
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Identity operations
    // -----------------------------------------------------------------------

    /// Create the device identity certificate.
    ///
    /// On any failure nothing is left behind: an instance created by this
    /// call is destroyed again before the error is returned.
    pub fn create(&self) -> X509Result<CertificateInfo> {
        self.lifecycle.gated(|| {
            let props = self.device_ca_properties();
            props.validate()?;

            let backend = self.binding.bind();
            let (instance, created) = self
                .binding
                .acquire_instance(backend.as_ref())
                .map_err(|e| {
                    log::warn!("Backend instance creation failed: {}", e);
                    X509Error::BackendCreate(e.to_string())
                })?;

            match backend.create_certificate(&instance, &props) {
                Ok(info) => {
                    log::debug!("Created certificate {} for alias '{}'", info.id(), props.alias());
                    Ok(info)
                }
                Err(e) => {
                    log::warn!("Certificate creation failed for alias '{}': {}", props.alias(), e);
                    if created {
                        self.binding.release_instance(backend.as_ref());
                    }
                    Err(X509Error::BackendCreate(e.to_string()))
                }
            }
        })
    }

    /// Release a certificate handle and the backend-side device identity.
    ///
    /// Accepts `None` and handles from elsewhere. The handle itself is only
    /// dropped; the backend is asked to destroy the device CA certificate and
    /// the held instance. Does nothing before `init` or when no instance is
    /// held. Never fails.
    pub fn destroy(&self, handle: Option<CertificateInfo>) {
        if let Some(info) = &handle {
            log::debug!("Releasing certificate handle {}", info.id());
        }
        drop(handle);

        self.lifecycle.when_initialized(|| {
            let backend = self.binding.bind();
            if let Some(instance) = self.binding.instance() {
                backend.destroy_certificate(&instance, self.device_ca_alias());
                self.binding.release_instance(backend.as_ref());
            }
        });
    }

    /// Fetch the certificate stored under `alias`.
    pub fn get_cert_info(&self, alias: &str) -> X509Result<CertificateInfo> {
        self.lifecycle.gated(|| {
            let backend = self.binding.bind();
            self.binding
                .with_instance(backend.as_ref(), |instance| {
                    backend.get_certificate(instance, alias)
                })
                .map_err(|e| {
                    log::warn!("Certificate fetch failed for alias '{}': {}", alias, e);
                    X509Error::BackendFetch(e.to_string())
                })
        })
    }

    /// Sign `data` with the private key held under `alias`. The returned
    /// buffer belongs to the caller; hand it back through `free_buffer`.
    pub fn sign_with_private_key(&self, alias: &str, data: &[u8]) -> X509Result<HsmBuffer> {
        self.lifecycle.gated(|| {
            let backend = self.binding.bind();
            self.binding
                .with_instance(backend.as_ref(), |instance| {
                    backend.sign_with_private_key(instance, alias, data)
                })
                .map_err(|e| {
                    log::warn!("Signing with alias '{}' failed: {}", alias, e);
                    X509Error::BackendSign(e.to_string())
                })
        })
    }

    /// Hand a backend buffer back. `None` is accepted.
    pub fn free_buffer(&self, buffer: Option<HsmBuffer>) {
        self.binding.bind().free_buffer(buffer)
    }

    // -----------------------------------------------------------------------
    // Accessors (no backend involved, no init required)
    // -----------------------------------------------------------------------

    pub fn get_cert(handle: Option<&CertificateInfo>) -> Option<&str> {
        handle
            .filter(|info| !info.is_malformed())
            .map(CertificateInfo::certificate)
    }

    pub fn get_key(handle: Option<&CertificateInfo>) -> Option<&[u8]> {
        handle
            .filter(|info| !info.is_malformed())
            .and_then(CertificateInfo::private_key)
            .map(|key| key.as_bytes())
            .filter(|bytes| !bytes.is_empty())
    }

    pub fn get_common_name(handle: Option<&CertificateInfo>) -> Option<&str> {
        handle
            .filter(|info| !info.is_malformed())
            .map(CertificateInfo::common_name)
            .filter(|cn| !cn.is_empty())
    }
}

fn same_backend(a: &Arc<dyn CryptoBackend>, b: &Arc<dyn CryptoBackend>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl Drop for X509Context {
    fn drop(&mut self) {
        self.lifecycle.shutdown(&self.binding);
    }
}

// ---------------------------------------------------------------------------
// Static interface table
// ---------------------------------------------------------------------------

/// The identity operations as plain function pointers.
pub struct X509Interface {
    pub create: fn(&X509Context) -> Option<CertificateInfo>,
    pub destroy: fn(&X509Context, Option<CertificateInfo>),
    pub get_cert: fn(Option<&CertificateInfo>) -> Option<&str>,
    pub get_key: fn(Option<&CertificateInfo>) -> Option<&[u8]>,
    pub get_common_name: fn(Option<&CertificateInfo>) -> Option<&str>,
    pub free_buffer: fn(&X509Context, Option<HsmBuffer>),
    pub sign_with_private_key: fn(&X509Context, &str, &[u8]) -> Option<HsmBuffer>,
}

fn create_entry(ctx: &X509Context) -> Option<CertificateInfo> {
    ctx.create().ok()
}

fn sign_entry(ctx: &X509Context, alias: &str, data: &[u8]) -> Option<HsmBuffer> {
    ctx.sign_with_private_key(alias, data).ok()
}

static X509_INTERFACE: X509Interface = X509Interface {
    create: create_entry,
    destroy: X509Context::destroy,
    get_cert: X509Context::get_cert,
    get_key: X509Context::get_key,
    get_common_name: X509Context::get_common_name,
    free_buffer: X509Context::free_buffer,
    sign_with_private_key: sign_entry,
};

/// The identity interface table. Usable before any `init`.
pub fn interface() -> &'static X509Interface {
    &X509_INTERFACE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOp, SimulatedBackend};
    use crate::certificate::{PrivateKey, PrivateKeyType};

    fn setup() -> (Arc<SimulatedBackend>, X509Context) {
        let sim = Arc::new(SimulatedBackend::new());
        let ctx = X509Context::new(sim.clone(), X509Config::default());
        (sim, ctx)
    }

    fn ops(sim: &SimulatedBackend) -> Vec<BackendOp> {
        sim.calls().into_iter().map(|c| c.op).collect()
    }

    #[test]
    fn test_create_without_init_fails_without_backend_calls() {
        let (sim, ctx) = setup();
        assert_eq!(ctx.create().unwrap_err(), X509Error::NotInitialized);
        assert!(sim.calls().is_empty());
    }

    #[test]
    fn test_create_success() {
        let (sim, ctx) = setup();
        ctx.init().unwrap();
        sim.reset_calls();

        let info = ctx.create().unwrap();

        assert_eq!(
            ops(&sim),
            vec![BackendOp::CreateInstance, BackendOp::CreateCertificate]
        );
        assert_eq!(info.common_name(), crate::config::DEFAULT_DEVICE_CA_COMMON_NAME);
        assert!(sim.has_certificate(ctx.device_ca_alias()));
    }

    #[test]
    fn test_create_instance_failure_short_circuits() {
        let (sim, ctx) = setup();
        ctx.init().unwrap();
        sim.fail_on(BackendOp::CreateInstance);

        let err = ctx.create().unwrap_err();

        assert!(matches!(err, X509Error::BackendCreate(_)));
        assert_eq!(sim.count(BackendOp::CreateCertificate), 0);
    }

    #[test]
    fn test_create_certificate_failure_leaves_nothing_behind() {
        let (sim, ctx) = setup();
        ctx.init().unwrap();
        sim.fail_on(BackendOp::CreateCertificate);

        assert!(matches!(ctx.create(), Err(X509Error::BackendCreate(_))));
        assert_eq!(sim.live_instances(), 0);
        assert!(!sim.has_certificate(ctx.device_ca_alias()));
    }

    #[test]
    fn test_create_rejects_invalid_config() {
        let sim = Arc::new(SimulatedBackend::new());
        let config = X509Config {
            common_name: String::new(),
            ..X509Config::default()
        };
        let ctx = X509Context::new(sim.clone(), config);
        ctx.init().unwrap();
        sim.reset_calls();

        assert!(matches!(ctx.create(), Err(X509Error::InvalidProperties(_))));
        assert!(sim.calls().is_empty());
    }

    #[test]
    fn test_destroy_targets_device_alias() {
        let (sim, ctx) = setup();
        ctx.init().unwrap();
        let info = ctx.create().unwrap();
        sim.reset_calls();

        ctx.destroy(Some(info));

        let calls = sim.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].op, BackendOp::DestroyCertificate);
        assert_eq!(calls[0].alias.as_deref(), Some(ctx.device_ca_alias()));
        assert_eq!(calls[1].op, BackendOp::DestroyInstance);
        assert_eq!(sim.live_instances(), 0);
    }

    #[test]
    fn test_destroy_none_and_foreign_handles() {
        let (sim, ctx) = setup();

        // Before init: nothing reaches the backend.
        ctx.destroy(None);
        let foreign = CertificateInfo::new("x", None, PrivateKeyType::Unknown, 0, "x");
        ctx.destroy(Some(foreign));
        assert!(sim.calls().is_empty());

        // After init with no instance held: still nothing to free.
        ctx.init().unwrap();
        sim.reset_calls();
        ctx.destroy(None);
        assert!(sim.calls().is_empty());

        // With an instance held, a None handle still frees the device identity.
        let _info = ctx.create().unwrap();
        ctx.destroy(None);
        assert_eq!(sim.count(BackendOp::DestroyCertificate), 1);
        assert_eq!(sim.live_instances(), 0);
    }

    #[test]
    fn test_accessors() {
        let info = CertificateInfo::new(
            "PEM",
            Some(PrivateKey::new(vec![9; 32])),
            PrivateKeyType::Payload,
            10,
            "device",
        );
        assert_eq!(X509Context::get_cert(Some(&info)), Some("PEM"));
        assert_eq!(X509Context::get_key(Some(&info)).map(<[u8]>::len), Some(32));
        assert_eq!(X509Context::get_common_name(Some(&info)), Some("device"));

        assert_eq!(X509Context::get_cert(None), None);
        assert_eq!(X509Context::get_key(None), None);
        assert_eq!(X509Context::get_common_name(None), None);
    }

    #[test]
    fn test_accessors_on_malformed_handle() {
        let malformed = CertificateInfo::new(
            "",
            Some(PrivateKey::new(vec![1])),
            PrivateKeyType::Payload,
            0,
            "cn",
        );
        assert_eq!(X509Context::get_cert(Some(&malformed)), None);
        assert_eq!(X509Context::get_key(Some(&malformed)), None);
        assert_eq!(X509Context::get_common_name(Some(&malformed)), None);

        let keyless = CertificateInfo::new("PEM", None, PrivateKeyType::Reference, 0, "");
        assert_eq!(X509Context::get_key(Some(&keyless)), None);
        assert_eq!(X509Context::get_common_name(Some(&keyless)), None);
    }

    #[test]
    fn test_sign_requires_init() {
        let (sim, ctx) = setup();
        assert_eq!(
            ctx.sign_with_private_key("device_ca_alias", b"data").unwrap_err(),
            X509Error::NotInitialized
        );
        assert!(sim.calls().is_empty());
    }

    #[test]
    fn test_sign_with_device_key() {
        let (sim, ctx) = setup();
        ctx.init().unwrap();
        let _info = ctx.create().unwrap();

        let digest = ctx.sign_with_private_key(ctx.device_ca_alias(), b"data").unwrap();
        assert!(sim.verify(ctx.device_ca_alias(), b"data", digest.as_bytes()));

        ctx.free_buffer(Some(digest));
        assert_eq!(sim.freed_buffers(), 1);
    }

    #[test]
    fn test_sign_failure_returns_no_digest() {
        let (sim, ctx) = setup();
        ctx.init().unwrap();
        let _info = ctx.create().unwrap();
        sim.fail_on(BackendOp::Sign);

        let err = ctx.sign_with_private_key(ctx.device_ca_alias(), b"data").unwrap_err();
        assert!(matches!(err, X509Error::BackendSign(_)));
    }

    #[test]
    fn test_free_buffer_is_unconditional() {
        let (sim, ctx) = setup();
        ctx.free_buffer(None);
        assert_eq!(sim.count(BackendOp::FreeBuffer), 1);
    }

    #[test]
    fn test_get_cert_info() {
        let (sim, ctx) = setup();
        assert_eq!(
            ctx.get_cert_info("device_ca_alias").unwrap_err(),
            X509Error::NotInitialized
        );

        ctx.init().unwrap();
        assert!(matches!(
            ctx.get_cert_info("device_ca_alias"),
            Err(X509Error::BackendFetch(_))
        ));

        let created = ctx.create().unwrap();
        let fetched = ctx.get_cert_info("device_ca_alias").unwrap();
        assert_eq!(fetched.certificate(), created.certificate());
        assert_eq!(sim.live_instances(), 1);
    }

    #[test]
    fn test_interface_table_matches_methods() {
        let (sim, ctx) = setup();
        let table = interface();

        assert!((table.create)(&ctx).is_none());

        ctx.init().unwrap();
        let info = (table.create)(&ctx).unwrap();
        assert!((table.get_cert)(Some(&info)).is_some());
        assert!((table.get_key)(Some(&info)).is_some());
        assert!((table.get_common_name)(Some(&info)).is_some());

        let digest = (table.sign_with_private_key)(&ctx, ctx.device_ca_alias(), b"abc").unwrap();
        (table.free_buffer)(&ctx, Some(digest));
        (table.destroy)(&ctx, Some(info));

        assert_eq!(sim.freed_buffers(), 1);
        assert_eq!(sim.live_instances(), 0);
    }

    #[test]
    fn test_drop_tears_down_backend() {
        let (sim, ctx) = setup();
        ctx.init().unwrap();
        ctx.init().unwrap();
        let _info = ctx.create().unwrap();

        drop(ctx);

        assert_eq!(sim.count(BackendOp::Deinit), 1);
        assert_eq!(sim.live_instances(), 0);
        assert!(!sim.is_initialized());
    }

    #[test]
    fn test_rebind_switches_backend() {
        let (first, ctx) = setup();
        ctx.init().unwrap();
        let _info = ctx.create().unwrap();

        let second = Arc::new(SimulatedBackend::new());
        ctx.rebind(second.clone()).unwrap();

        assert_eq!(first.live_instances(), 0);
        assert_eq!(first.count(BackendOp::Deinit), 1);
        assert!(second.is_initialized());

        let _info = ctx.create().unwrap();
        assert_eq!(second.count(BackendOp::CreateCertificate), 1);
        assert_eq!(first.count(BackendOp::CreateCertificate), 1);
    }

    #[test]
    fn test_rebind_to_same_backend_keeps_it_initialized() {
        let (sim, ctx) = setup();
        ctx.init().unwrap();
        let _info = ctx.create().unwrap();

        ctx.rebind(sim.clone()).unwrap();

        assert_eq!(ctx.init_count(), 1);
        assert!(sim.is_initialized());
        assert_eq!(sim.count(BackendOp::Init), 1);
        assert_eq!(sim.count(BackendOp::Deinit), 0);
        assert_eq!(sim.live_instances(), 1);

        ctx.deinit();
        assert_eq!(sim.count(BackendOp::Deinit), 1);
        assert_eq!(sim.live_instances(), 0);
    }

    #[test]
    fn test_rebind_keeps_backend_when_replacement_fails() {
        let (first, ctx) = setup();
        ctx.init().unwrap();

        let second = Arc::new(SimulatedBackend::new());
        second.fail_on(BackendOp::Init);

        assert!(matches!(ctx.rebind(second.clone()), Err(X509Error::BackendInit(_))));
        assert_eq!(first.count(BackendOp::Deinit), 0);

        let _info = ctx.create().unwrap();
        assert_eq!(first.count(BackendOp::CreateCertificate), 1);
        assert_eq!(second.count(BackendOp::CreateInstance), 0);
    }

    struct FixedAlias(&'static str);

    impl AliasLookup for FixedAlias {
        fn device_ca_alias(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_alias_lookup_names_device_identity() {
        let sim = Arc::new(SimulatedBackend::new());
        let ctx = X509Context::new(sim.clone(), X509Config::default())
            .with_alias_lookup(Arc::new(FixedAlias("edge_ca")));
        ctx.init().unwrap();

        assert_eq!(ctx.device_ca_alias(), "edge_ca");
        let info = ctx.create().unwrap();
        assert!(sim.has_certificate("edge_ca"));
        assert!(!sim.has_certificate(crate::config::DEFAULT_DEVICE_CA_ALIAS));

        let digest = ctx.sign_with_private_key("edge_ca", b"data").unwrap();
        assert!(sim.verify("edge_ca", b"data", digest.as_bytes()));

        ctx.destroy(Some(info));
        assert!(!sim.has_certificate("edge_ca"));
    }
}
