//! Server selection, blacklisting and bound sessions

use crate::client::{
    CertificateVerifier, DirectoryClient, DirectoryConnection, Modification, SearchRequest,
    TlsOptions,
};
use crate::metrics::names;
use dirauth_core::config::{DirectoryConfig, SelectionPolicy};
use dirauth_core::types::DirectoryEntry;
use dirauth_core::{Error, Result};
use metrics::counter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Snapshot of one configured server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerState {
    pub address: String,
    /// Time left on the blacklist, `None` when usable
    pub blacklisted_for: Option<Duration>,
}

#[derive(Debug, Default)]
struct ServerTable {
    pointer: usize,
    /// server index -> blacklisted until
    blacklist: HashMap<usize, Instant>,
}

impl ServerTable {
    /// Usable now; expired blacklist entries are dropped on the way
    fn is_usable(&mut self, index: usize, now: Instant) -> bool {
        match self.blacklist.get(&index) {
            None => true,
            Some(until) if *until <= now => {
                self.blacklist.remove(&index);
                true
            }
            Some(_) => false,
        }
    }
}

/// Opens bound sessions against a list of servers
pub struct SessionManager {
    client: Arc<dyn DirectoryClient>,
    servers: Vec<String>,
    port: u16,
    policy: SelectionPolicy,
    blacklist_duration: Duration,
    timeout: Duration,
    tls: TlsOptions,
    service_dn: String,
    service_password: String,
    state: Mutex<ServerTable>,
}

impl SessionManager {
    pub fn new(config: &DirectoryConfig, client: Arc<dyn DirectoryClient>) -> Self {
        Self {
            client,
            servers: config.servers.clone(),
            port: config.port,
            policy: config.selection_policy,
            blacklist_duration: config.blacklist_duration(),
            timeout: config.timeout(),
            tls: TlsOptions {
                use_ssl: config.use_ssl,
                start_tls: config.start_tls,
                skip_verify: config.skip_tls_verify,
                verifier: None,
                timeout: config.timeout(),
            },
            service_dn: config.bind_dn.clone(),
            service_password: config.bind_password.clone(),
            state: Mutex::new(ServerTable::default()),
        }
    }

    pub fn with_certificate_verifier(mut self, verifier: Arc<dyn CertificateVerifier>) -> Self {
        self.tls.verifier = Some(verifier);
        self
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open a session bound as the configured service account
    pub async fn connect_service(&self) -> Result<Session> {
        self.connect(&self.service_dn, &self.service_password).await
    }

    /// Open a session bound as `name`.
    ///
    /// Every server is tried at most once. Unreachable servers are
    /// blacklisted and skipped; a rejected bind ends the attempt at once.
    pub async fn connect(&self, name: &str, password: &str) -> Result<Session> {
        if self.servers.is_empty() {
            return Err(Error::NoServerAvailable);
        }

        let mut tried = vec![false; self.servers.len()];
        let mut last_error = None;

        while let Some(index) = self.select_server(&tried) {
            tried[index] = true;

            let server = &self.servers[index];
            counter!(names::CONNECT_ATTEMPTS_TOTAL).increment(1);

            match self.open(server, name, password).await {
                Ok(conn) => {
                    debug!("Bound to {} as {}", server, name);
                    return Ok(Session::new(server.clone(), conn));
                }
                Err(e @ (Error::Connection(_) | Error::Timeout(_) | Error::Io(_))) => {
                    warn!("Directory server {} unavailable: {}", server, e);
                    self.blacklist(index);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(Error::NoServerAvailable))
    }

    /// Current view of the server list
    pub fn server_states(&self) -> Vec<ServerState> {
        let table = self.state.lock();
        let now = Instant::now();
        self.servers
            .iter()
            .enumerate()
            .map(|(index, address)| ServerState {
                address: address.clone(),
                blacklisted_for: table
                    .blacklist
                    .get(&index)
                    .filter(|until| **until > now)
                    .map(|until| *until - now),
            })
            .collect()
    }

    /// Next server not yet in `tried`, by policy. When every server is
    /// blacklisted before any attempt, the starting server is returned anyway.
    fn select_server(&self, tried: &[bool]) -> Option<usize> {
        let mut table = self.state.lock();
        let now = Instant::now();
        let count = self.servers.len();
        let start = table.pointer % count;

        for offset in 0..count {
            let index = (start + offset) % count;
            if !tried[index] && table.is_usable(index, now) {
                table.pointer = match self.policy {
                    SelectionPolicy::Failover => index,
                    SelectionPolicy::RoundRobin => (index + 1) % count,
                };
                return Some(index);
            }
        }

        if tried.iter().any(|t| *t) {
            return None;
        }

        // everything is blacklisted
        if self.policy == SelectionPolicy::RoundRobin {
            table.pointer = (start + 1) % count;
        }
        Some(start)
    }

    fn blacklist(&self, index: usize) {
        let until = Instant::now() + self.blacklist_duration;
        self.state.lock().blacklist.insert(index, until);
        counter!(names::SERVER_BLACKLISTED_TOTAL).increment(1);
        info!(
            "Blacklisted directory server {} for {:?}",
            self.servers[index], self.blacklist_duration
        );
    }

    async fn open(
        &self,
        server: &str,
        name: &str,
        password: &str,
    ) -> Result<Box<dyn DirectoryConnection>> {
        let mut conn = timeout(self.timeout, self.client.connect(server, self.port, &self.tls))
            .await
            .map_err(|_| Error::Timeout(format!("connecting to {}", server)))??;

        match timeout(self.timeout, conn.bind(name, password)).await {
            Ok(Ok(())) => Ok(conn),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Timeout(format!("binding to {}", server))),
        }
    }
}

/// A connection bound to one server
pub struct Session {
    server: String,
    conn: Option<Box<dyn DirectoryConnection>>,
}

impl Session {
    fn new(server: String, conn: Box<dyn DirectoryConnection>) -> Self {
        Self {
            server,
            conn: Some(conn),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn conn(&mut self) -> Result<&mut Box<dyn DirectoryConnection>> {
        self.conn.as_mut().ok_or(Error::Disposed)
    }

    /// Run a search to completion, following paging cookies.
    ///
    /// While a page is outstanding, `cancel` and the `limit` deadline are
    /// checked every `poll`. Partial results are discarded on either.
    pub async fn search(
        &mut self,
        request: &SearchRequest,
        cancel: &CancellationToken,
        poll: Duration,
        limit: Duration,
    ) -> Result<Vec<DirectoryEntry>> {
        let started = Instant::now();
        let mut entries = Vec::new();
        let mut cookie = None;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let conn = self.conn()?;
            let fetch = conn.search_page(request, cookie.take());
            tokio::pin!(fetch);

            let mut ticker = tokio::time::interval(poll);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let page = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(
                            "Search {} cancelled, discarding {} entries",
                            request.filter,
                            entries.len()
                        );
                        return Err(Error::Cancelled);
                    }
                    page = &mut fetch => break page?,
                    _ = ticker.tick() => {
                        if started.elapsed() >= limit {
                            return Err(Error::Timeout(format!(
                                "search {} under {}",
                                request.filter, request.base
                            )));
                        }
                        trace!("Waiting for page of {}", request.filter);
                    }
                }
            };

            counter!(names::SEARCH_PAGES_TOTAL).increment(1);
            entries.extend(page.entries);

            match page.cookie {
                Some(next) if !next.is_empty() => cookie = Some(next),
                _ => break,
            }
        }

        Ok(entries)
    }

    pub async fn modify(&mut self, dn: &str, modifications: Vec<Modification>) -> Result<()> {
        self.conn()?.modify(dn, modifications).await
    }

    /// Unbind and release the connection; later calls fail with `Disposed`
    pub async fn close(&mut self) -> Result<()> {
        match self.conn.take() {
            Some(mut conn) => conn.unbind().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDirectory;
    use dirauth_core::types::SearchScope;

    fn config(policy: SelectionPolicy) -> DirectoryConfig {
        DirectoryConfig {
            servers: vec!["a".into(), "b".into(), "c".into()],
            bind_dn: "svc".into(),
            bind_password: "svc-pass".into(),
            selection_policy: policy,
            blacklist_duration_seconds: 60,
            ..Default::default()
        }
    }

    fn directory() -> MemoryDirectory {
        MemoryDirectory::new()
            .with_account("svc", "svc-pass")
            .with_account("jane", "secret")
    }

    fn manager(policy: SelectionPolicy, directory: &MemoryDirectory) -> SessionManager {
        SessionManager::new(&config(policy), Arc::new(directory.clone()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_skips_blacklisted_and_stays() {
        let directory = directory();
        directory.set_reachable("a", false);
        let manager = manager(SelectionPolicy::Failover, &directory);

        let session = manager.connect_service().await.unwrap();
        assert_eq!(session.server(), "b");
        assert!(manager.server_states()[0].blacklisted_for.is_some());

        // A's blacklist lapses, the pointer stays on B
        directory.set_reachable("a", true);
        tokio::time::advance(Duration::from_secs(61)).await;
        let session = manager.connect_service().await.unwrap();
        assert_eq!(session.server(), "b");
        assert_eq!(directory.connects(), vec!["a", "b", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blacklisted_server_not_retried_within_window() {
        let directory = directory();
        directory.set_reachable("a", false);
        let manager = manager(SelectionPolicy::RoundRobin, &directory);

        for _ in 0..4 {
            manager.connect_service().await.unwrap();
        }
        let to_a = directory.connects().iter().filter(|s| *s == "a").count();
        assert_eq!(to_a, 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        for _ in 0..2 {
            let _ = manager.connect_service().await;
        }
        let to_a = directory.connects().iter().filter(|s| *s == "a").count();
        assert_eq!(to_a, 2);
    }

    #[tokio::test]
    async fn test_round_robin_rotates() {
        let directory = directory();
        let manager = manager(SelectionPolicy::RoundRobin, &directory);

        let mut used = Vec::new();
        for _ in 0..4 {
            used.push(manager.connect_service().await.unwrap().server().to_string());
        }
        assert_eq!(used, vec!["a", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_all_servers_down() {
        let directory = directory();
        for server in ["a", "b", "c"] {
            directory.set_reachable(server, false);
        }
        let manager = manager(SelectionPolicy::Failover, &directory);

        let err = manager.connect_service().await.err().unwrap();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(directory.connects(), vec!["a", "b", "c"]);

        // every server blacklisted: one attempt at the current pointer
        let _ = manager.connect_service().await;
        assert_eq!(directory.connects().len(), 4);
    }

    #[tokio::test]
    async fn test_lapsed_blacklist_does_not_stop_failover() {
        let directory = directory();
        directory.set_reachable("a", false);
        let config = DirectoryConfig {
            blacklist_duration_seconds: 0,
            ..config(SelectionPolicy::Failover)
        };
        let manager = SessionManager::new(&config, Arc::new(directory.clone()));

        let session = manager.connect_service().await.unwrap();
        assert_eq!(session.server(), "b");
        assert_eq!(directory.connects(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_each_server_tried_once_per_connect() {
        let directory = directory();
        directory.set_reachable("a", false);
        directory.set_reachable("b", false);
        let manager = manager(SelectionPolicy::RoundRobin, &directory);

        let session = manager.connect_service().await.unwrap();
        assert_eq!(session.server(), "c");
        assert_eq!(directory.connects(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_rejected_bind_is_not_retried() {
        let directory = directory();
        let manager = manager(SelectionPolicy::Failover, &directory);

        let err = manager.connect("jane", "wrong").await.err().unwrap();
        assert!(matches!(err, Error::AuthenticationFailed(_)));
        assert_eq!(directory.connects(), vec!["a"]);
        assert!(manager.server_states().iter().all(|s| s.blacklisted_for.is_none()));
    }

    #[tokio::test]
    async fn test_busy_server_fails_over() {
        let directory = directory();
        directory.set_busy("a", true);
        let manager = manager(SelectionPolicy::Failover, &directory);

        let session = manager.connect("jane", "secret").await.unwrap();
        assert_eq!(session.server(), "b");
    }

    #[tokio::test]
    async fn test_no_servers() {
        let manager = SessionManager::new(
            &DirectoryConfig::default(),
            Arc::new(MemoryDirectory::new()),
        );
        assert!(matches!(
            manager.connect_service().await,
            Err(Error::NoServerAvailable)
        ));
    }

    #[tokio::test]
    async fn test_closed_session_is_disposed() {
        let directory = directory();
        let manager = manager(SelectionPolicy::Failover, &directory);
        let mut session = manager.connect_service().await.unwrap();

        session.close().await.unwrap();
        assert!(!session.is_open());
        let request = SearchRequest::new("dc=x", SearchScope::Subtree, "(objectClass=*)");
        let result = session
            .search(
                &request,
                &CancellationToken::new(),
                Duration::from_millis(10),
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(result, Err(Error::Disposed)));
        assert!(matches!(
            session.modify("dc=x", vec![]).await,
            Err(Error::Disposed)
        ));
    }

    #[tokio::test]
    async fn test_search_follows_pages() {
        let directory = directory();
        for i in 0..5 {
            directory.add_entry(
                DirectoryEntry::new(format!("CN=U{},DC=example,DC=com", i))
                    .with_attr("objectClass", ["user"]),
            );
        }
        let manager = manager(SelectionPolicy::Failover, &directory);
        let mut session = manager.connect_service().await.unwrap();

        let request =
            SearchRequest::new("DC=example,DC=com", SearchScope::Subtree, "(objectClass=user)")
                .page_size(2);
        let entries = session
            .search(
                &request,
                &CancellationToken::new(),
                Duration::from_millis(10),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(directory.search_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_cancelled_while_waiting() {
        let directory = directory();
        directory.set_response_delay(Some(Duration::from_secs(30)));
        let manager = manager(SelectionPolicy::Failover, &directory);
        let mut session = manager.connect_service().await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let request = SearchRequest::new("DC=example,DC=com", SearchScope::Subtree, "(objectClass=*)");
        let result = session
            .search(
                &request,
                &cancel,
                Duration::from_millis(100),
                Duration::from_secs(60),
            )
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_times_out() {
        let directory = directory();
        directory.set_response_delay(Some(Duration::from_secs(30)));
        let manager = manager(SelectionPolicy::Failover, &directory);
        let mut session = manager.connect_service().await.unwrap();

        let request = SearchRequest::new("DC=example,DC=com", SearchScope::Subtree, "(objectClass=*)");
        let result = session
            .search(
                &request,
                &CancellationToken::new(),
                Duration::from_millis(100),
                Duration::from_secs(2),
            )
            .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }
}
