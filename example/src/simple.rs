use std::sync::Arc;

use pgportal::{Bind, JobLog, PortalName, Result, Session, SessionConfig, row};

use crate::table::{self, PrintSink, Table, TableAnalyzer};

pub async fn main(config: SessionConfig, jobs: Arc<dyn JobLog>) -> Result<()> {
    let table = Arc::new(Table::default());
    let mut session = Session::new(Arc::new(TableAnalyzer), table, jobs, config);
    let unnamed = PortalName::unnamed();

    for (id, name) in [(1, "Deez"), (2, "Foo"), (3, "Bar"), (4, "Baz"), (5, "Qux")] {
        let sql = "INSERT INTO people VALUES ($1, $2)";
        session.bind(unnamed.clone(), Bind::new(sql, table::parse(sql)?).params(row![id, name]))?;
        session.execute(&unnamed, PrintSink::boxed("insert"), 0)?;
        for completion in session.sync() {
            completion?.await?;
        }
    }

    // All rows in one round

    let sql = "SELECT * FROM people";
    session.bind(unnamed.clone(), Bind::new(sql, table::parse(sql)?))?;
    let fields = session.describe(&unnamed)?.unwrap_or_default();
    assert_eq!(fields.len(), 2);
    assert_eq!(fields[0].name(), "id");

    session.execute(&unnamed, PrintSink::boxed("select"), 0)?;
    for completion in session.sync() {
        completion?.await?;
    }

    // Suspended cursor, two rows per round

    let cursor = PortalName::from("cursor");
    session.bind(cursor.clone(), Bind::new(sql, table::parse(sql)?))?;

    for label in ["round 1", "round 2", "round 3"] {
        session.execute(&cursor, PrintSink::boxed(label), 2)?;
        for completion in session.sync() {
            completion?.await?;
        }
    }

    // Closing while suspended interrupts the remaining rows

    let sql = "SELECT * FROM people LIMIT 4";
    session.bind(cursor.clone(), Bind::new(sql, table::parse(sql)?))?;
    session.execute(&cursor, PrintSink::boxed("limited"), 1)?;
    for completion in session.sync() {
        completion?.await?;
    }
    session.close_portal(&cursor);

    Ok(())
}
