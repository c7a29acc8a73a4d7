use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::{ProcedureBase, ProviderProcedure};

pub fn get_procedure_base(
    conn: &Connection,
    id: &Uuid,
) -> Result<Option<ProcedureBase>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, code, description, adults_only FROM procedure_bases WHERE id = ?1",
    )?;

    let result = stmt.query_row(params![id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i32>(3)?,
        ))
    });

    match result {
        Ok((id, code, description, adults_only)) => Ok(Some(ProcedureBase {
            id: Uuid::parse_str(&id)
                .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
            code,
            description,
            adults_only: adults_only != 0,
        })),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Test/seed helper: the catalog is normally populated by an external sync.
pub fn insert_procedure_base(conn: &Connection, base: &ProcedureBase) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO procedure_bases (id, code, description, adults_only)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            base.id.to_string(),
            base.code,
            base.description,
            base.adults_only as i32,
        ],
    )?;
    Ok(())
}

pub fn insert_provider_procedure(
    conn: &Connection,
    proc_: &ProviderProcedure,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO provider_procedures (id, provider_id, procedure_base_id, code,
         description, periciable, max_value, active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            proc_.id.to_string(),
            proc_.provider_id.to_string(),
            proc_.procedure_base_id.map(|id| id.to_string()),
            proc_.code,
            proc_.description,
            proc_.periciable as i32,
            proc_.max_value,
            proc_.active as i32,
            proc_.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ],
    )?;
    Ok(())
}

pub fn get_provider_procedure(
    conn: &Connection,
    id: &Uuid,
) -> Result<Option<ProviderProcedure>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, provider_id, procedure_base_id, code, description, periciable,
         max_value, active, created_at
         FROM provider_procedures WHERE id = ?1",
    )?;

    let result = stmt.query_row(params![id.to_string()], |row| {
        Ok(ProviderProcedureRow {
            id: row.get(0)?,
            provider_id: row.get(1)?,
            procedure_base_id: row.get(2)?,
            code: row.get(3)?,
            description: row.get(4)?,
            periciable: row.get(5)?,
            max_value: row.get(6)?,
            active: row.get(7)?,
            created_at: row.get(8)?,
        })
    });

    match result {
        Ok(row) => Ok(Some(provider_procedure_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn count_provider_procedures(
    conn: &Connection,
    provider_id: &Uuid,
) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM provider_procedures WHERE provider_id = ?1",
        params![provider_id.to_string()],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(count)
}

struct ProviderProcedureRow {
    id: String,
    provider_id: String,
    procedure_base_id: Option<String>,
    code: String,
    description: String,
    periciable: i32,
    max_value: Option<f64>,
    active: i32,
    created_at: String,
}

fn provider_procedure_from_row(
    row: ProviderProcedureRow,
) -> Result<ProviderProcedure, DatabaseError> {
    Ok(ProviderProcedure {
        id: Uuid::parse_str(&row.id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        provider_id: Uuid::parse_str(&row.provider_id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        procedure_base_id: row.procedure_base_id.and_then(|s| Uuid::parse_str(&s).ok()),
        code: row.code,
        description: row.description,
        periciable: row.periciable != 0,
        max_value: row.max_value,
        active: row.active != 0,
        created_at: NaiveDateTime::parse_from_str(&row.created_at, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    #[test]
    fn procedure_base_round_trip() {
        let conn = open_memory_database().unwrap();
        let base = ProcedureBase {
            id: Uuid::new_v4(),
            code: "A1.02.03.04".into(),
            description: "Destartarização".into(),
            adults_only: true,
        };
        insert_procedure_base(&conn, &base).unwrap();

        let loaded = get_procedure_base(&conn, &base.id).unwrap().unwrap();
        assert_eq!(loaded.code, "A1.02.03.04");
        assert!(loaded.adults_only);
    }

    #[test]
    fn unknown_base_returns_none() {
        let conn = open_memory_database().unwrap();
        assert!(get_procedure_base(&conn, &Uuid::new_v4())
            .unwrap()
            .is_none());
    }

    #[test]
    fn provider_procedure_round_trip() {
        let conn = open_memory_database().unwrap();
        let proc_ = ProviderProcedure {
            id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            procedure_base_id: None,
            code: "A1.01.01.01".into(),
            description: "Consulta inicial".into(),
            periciable: false,
            max_value: Some(50.0),
            active: true,
            created_at: chrono::Utc::now().naive_utc(),
        };
        insert_provider_procedure(&conn, &proc_).unwrap();

        let loaded = get_provider_procedure(&conn, &proc_.id).unwrap().unwrap();
        assert_eq!(loaded.code, "A1.01.01.01");
        assert!(loaded.procedure_base_id.is_none());
        assert_eq!(loaded.max_value, Some(50.0));
        assert!(loaded.active);

        assert_eq!(
            count_provider_procedures(&conn, &proc_.provider_id).unwrap(),
            1
        );
    }
}
