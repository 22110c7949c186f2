use std::sync::Arc;

use pgportal::{Bind, JobLog, PortalName, Result, Session, SessionConfig, row};

use crate::table::{self, PrintSink, Table, TableAnalyzer};

pub async fn main(config: SessionConfig, jobs: Arc<dyn JobLog>) -> Result<()> {
    let table = Arc::new(Table::default());
    let mut session = Session::new(Arc::new(TableAnalyzer), table, jobs, config);
    let unnamed = PortalName::unnamed();

    // Bulk, one prepared statement bound three times

    let sql = "INSERT INTO people VALUES ($1, $2)";
    let statement = table::parse(sql)?;

    for (id, name) in [(1, "Deez"), (2, "Foo"), (3, "Bar")] {
        session.bind(unnamed.clone(), Bind::new(sql, statement.clone()).params(row![id, name]))?;
        session.execute(&unnamed, PrintSink::boxed("bulk"), 0)?;
    }
    assert!(session.portal(&unnamed).is_some_and(|e| e.is_bulk()));

    for completion in session.sync() {
        completion?.await?;
    }

    // Batch, distinct statements before one sync

    for (sql, params) in [
        ("INSERT INTO people VALUES ($1, $2)", row![4, "Baz"]),
        ("SELECT * FROM people", Default::default()),
        ("SELECT * FROM people LIMIT 1", Default::default()),
    ] {
        session.bind(unnamed.clone(), Bind::new(sql, table::parse(sql)?).params(params))?;
        session.execute(&unnamed, PrintSink::boxed(sql), 0)?;
    }
    assert!(session.portal(&unnamed).is_some_and(|e| e.is_batch()));

    for completion in session.sync() {
        completion?.await?;
    }

    Ok(())
}
