//! Portal registry of one client session.
use std::{collections::HashMap, sync::Arc};

use crate::{
    Error, Result,
    analyze::{Analyzer, Field},
    common::verbose,
    config::SessionConfig,
    job::JobLog,
    plan::Planner,
    portal::{Bind, Portal, PortalContext},
    sink::{Completion, ResultSink},
    statement::PortalName,
};

/// Client session, owner of its portals.
///
/// Calls are serialized by `&mut self`, portals never see concurrent access.
/// Dropping the session closes every portal.
pub struct Session<A: Analyzer, P> {
    context: PortalContext<A>,
    planner: Arc<P>,
    job_log: Arc<dyn JobLog>,
    portals: HashMap<PortalName, Portal<A>>,
    /// Portals with an execute since the last sync, in issue order.
    pending: Vec<PortalName>,
}

impl<A, P> Session<A, P>
where
    A: Analyzer,
    P: Planner<A::Statement>,
{
    pub fn new(analyzer: Arc<A>, planner: Arc<P>, job_log: Arc<dyn JobLog>, config: SessionConfig) -> Self {
        Self {
            context: PortalContext::new(analyzer, config),
            planner,
            job_log,
            portals: HashMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        self.context.config()
    }

    pub fn portal(&self, name: &PortalName) -> Option<&Portal<A>> {
        self.portals.get(name)
    }

    /// Bind a statement to `portal`, creating the portal on first use.
    pub fn bind(&mut self, portal: impl Into<PortalName>, bind: Bind<A::Tree>) -> Result<()> {
        let name = portal.into();
        if let Some(portal) = self.portals.get_mut(&name) {
            return portal.bind(bind);
        }

        let mut portal = Portal::new(name.clone(), self.context.clone());
        portal.bind(bind)?;
        verbose!(portal = %name, "portal created");
        self.portals.insert(name, portal);
        Ok(())
    }

    pub fn describe(&self, portal: &PortalName) -> Result<Option<&[Field]>> {
        Ok(self.get(portal)?.describe())
    }

    pub fn execute(&mut self, portal: &PortalName, sink: Box<dyn ResultSink>, max_rows: u32) -> Result<()> {
        self.get_mut(portal)?.execute(sink, max_rows)?;
        if !self.pending.contains(portal) {
            self.pending.push(portal.clone());
        }
        Ok(())
    }

    /// Sync every portal with a pending execute, in the order executes were issued.
    ///
    /// Returns one result per synced portal. A planning failure is the last entry,
    /// executes not yet synced after it are discarded. Portals synced before it keep
    /// running and their completions are returned.
    pub fn sync(&mut self) -> Vec<Result<Completion>> {
        let pending = std::mem::take(&mut self.pending);
        let mut completions = Vec::with_capacity(pending.len());

        for name in pending {
            let Some(portal) = self.portals.get_mut(&name) else {
                continue;
            };
            let result = portal.sync(&self.planner, &self.job_log);
            let failed = result.is_err();
            completions.push(result);
            if failed {
                verbose!(portal = %name, "sync stopped by planning failure");
                break;
            }
        }

        completions
    }

    /// Close and forget `portal`, returns `false` if it did not exist.
    pub fn close_portal(&mut self, portal: &PortalName) -> bool {
        self.pending.retain(|e| e != portal);
        match self.portals.remove(portal) {
            Some(mut portal) => {
                portal.close();
                true
            },
            None => false,
        }
    }

    fn get(&self, name: &PortalName) -> Result<&Portal<A>> {
        self.portals
            .get(name)
            .ok_or_else(|| Error::protocol(format!("portal {name} does not exist")))
    }

    fn get_mut(&mut self, name: &PortalName) -> Result<&mut Portal<A>> {
        self.portals
            .get_mut(name)
            .ok_or_else(|| Error::protocol(format!("portal {name} does not exist")))
    }
}

impl<A: Analyzer, P> Drop for Session<A, P> {
    fn drop(&mut self) {
        for portal in self.portals.values_mut() {
            portal.close();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        ErrorKind,
        statement::Statement,
        testing::{self, RecordingSink, TestAnalyzer, TestPlanner},
    };

    fn session(rows: i64) -> (Session<TestAnalyzer, TestPlanner>, Arc<TestPlanner>) {
        let (context, _) = testing::context(SessionConfig::default());
        let planner = testing::planner(rows);
        let (job_log, _) = testing::job_log();
        let session = Session::new(context.analyzer().clone(), planner.clone(), job_log, SessionConfig::default());
        (session, planner)
    }

    fn bind(sql: &'static str) -> Bind<&'static str> {
        Bind::new(sql, Statement::new(sql))
    }

    #[tokio::test]
    async fn sync_in_issue_order() {
        let (mut session, planner) = session(1);
        let (a, b) = (PortalName::from("a"), PortalName::from("b"));

        session.bind(b.clone(), bind("SELECT x FROM b")).unwrap();
        session.bind(a.clone(), bind("SELECT x FROM a")).unwrap();

        let (sink, _) = RecordingSink::new();
        session.execute(&a, Box::new(sink), 0).unwrap();
        let (sink, _) = RecordingSink::new();
        session.execute(&b, Box::new(sink), 0).unwrap();

        let completions = session.sync();
        assert_eq!(completions.len(), 2);
        for completion in completions {
            completion.unwrap().await.unwrap();
        }

        let order: Vec<_> = planner.executions().into_iter().map(|e| e.sql).collect();
        assert_eq!(order, ["SELECT x FROM a", "SELECT x FROM b"]);
        assert!(session.sync().is_empty());
    }

    #[tokio::test]
    async fn close_portal_finishes_suspended() {
        let (mut session, _) = session(3);
        let name = PortalName::unnamed();
        session.bind(name.clone(), bind("SELECT x FROM t")).unwrap();

        let (sink, record) = RecordingSink::new();
        session.execute(&name, Box::new(sink), 1).unwrap();
        for completion in session.sync() {
            completion.unwrap().await.unwrap();
        }
        assert!(matches!(session.portal(&name), Some(Portal::Simple(p)) if p.is_suspended()));

        assert!(session.close_portal(&name));
        assert!(!session.close_portal(&name));
        assert_eq!(record.all_finished(), vec![true]);
    }

    #[tokio::test]
    async fn planning_failure_keeps_started_completions() {
        let (mut session, planner) = session(2);
        let names = ["a", "b", "c"].map(PortalName::from);
        session.bind(names[0].clone(), bind("SELECT x FROM a")).unwrap();
        session.bind(names[1].clone(), bind("SELECT x FROM missing")).unwrap();
        session.bind(names[2].clone(), bind("SELECT x FROM c")).unwrap();

        let (sink, record) = RecordingSink::new();
        session.execute(&names[0], Box::new(sink), 0).unwrap();
        for name in &names[1..] {
            let (sink, _) = RecordingSink::new();
            session.execute(name, Box::new(sink), 0).unwrap();
        }

        let mut completions = session.sync().into_iter();
        completions.next().unwrap().unwrap().await.unwrap();
        let err = completions.next().unwrap().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Planning(_)));
        assert!(completions.next().is_none());

        assert_eq!(record.rows().len(), 2);
        assert_eq!(planner.executions().len(), 1);
        assert!(session.sync().is_empty());
    }

    #[test]
    fn unknown_portal() {
        let (mut session, _) = session(0);
        let (sink, _) = RecordingSink::new();
        let err = session.execute(&PortalName::from("nope"), Box::new(sink), 0).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Protocol(_)));
        assert!(session.describe(&PortalName::from("nope")).is_err());
    }
}
