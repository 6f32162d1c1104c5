//! Device Registry (C7): the only place writes to persistent state are authorized.
//!
//! Backed by SQLite via `rusqlite` -- the teacher has no database layer of its own, so this
//! crate is introduced fresh, following the single-shared-connection, one-statement-per-call
//! style the design calls for (`check_same_thread` relaxed, writes commit immediately, no
//! manual transactions). Every call is dispatched onto a blocking task since `rusqlite` is a
//! synchronous driver and must not run directly on the async runtime.

use crate::types::{Attribute, Device, EndpointId, NodeId, UniqueId};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the device database at {0:?}")]
    Open(#[source] rusqlite::Error, std::path::PathBuf),
    #[error("could not initialize the device database schema")]
    InitSchema(#[source] rusqlite::Error),
    #[error("database query failed")]
    Query(#[source] rusqlite::Error),
    #[error("the blocking database task panicked")]
    Join(#[source] tokio::task::JoinError),
}

#[derive(Clone)]
pub struct Registry {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl Registry {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let conn = tokio::task::spawn_blocking({
            let path = path.clone();
            move || -> Result<rusqlite::Connection, Error> {
                let conn =
                    rusqlite::Connection::open(&path).map_err(|e| Error::Open(e, path.clone()))?;
                initialize_schema(&conn)?;
                Ok(conn)
            }
        })
        .await
        .map_err(Error::Join)??;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&conn).map_err(Error::Query)
        })
        .await
        .map_err(Error::Join)?
    }

    /// `max(node)+1`, or 1 if no devices have been committed yet (I2).
    pub async fn new_node_id(&self) -> Result<NodeId, Error> {
        self.with_conn(|conn| {
            let max: Option<i64> =
                conn.query_row("SELECT MAX(NodeID) FROM Device", [], |row| row.get(0))?;
            Ok(NodeId(max.map(|n| n as u64 + 1).unwrap_or(1)))
        })
        .await
    }

    /// Returns `false` on a primary-key violation instead of erroring.
    pub async fn insert_device(&self, device: Device) -> Result<bool, Error> {
        self.with_conn(move |conn| {
            let result = conn.execute(
                "INSERT INTO Device (NodeID, Endpoint, DeviceType, TopicID, VendorName, ProductName, Name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    device.node_id.0 as i64,
                    device.endpoint.0 as i64,
                    device.device_type as i64,
                    device.topic_id,
                    device.vendor_name,
                    device.product_name,
                    device.name,
                ],
            );
            match result {
                Ok(_) => Ok(true),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Ok(false)
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// Returns `true` if a device row was found and updated, `false` if no such device exists.
    pub async fn rename_device(&self, node_id: NodeId, endpoint: EndpointId, name: String) -> Result<bool, Error> {
        self.with_conn(move |conn| {
            let rows = conn.execute(
                "UPDATE Device SET Name = ?1 WHERE NodeID = ?2 AND Endpoint = ?3",
                rusqlite::params![name, node_id.0 as i64, endpoint.0 as i64],
            )?;
            Ok(rows > 0)
        })
        .await
    }

    pub async fn delete_unique_id(&self, node_id: NodeId) -> Result<(), Error> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM UniqueID WHERE NodeID = ?1", rusqlite::params![node_id.0 as i64])?;
            Ok(())
        })
        .await
    }

    pub async fn delete_device(&self, node_id: NodeId, endpoint: EndpointId) -> Result<(), Error> {
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM Attribute WHERE NodeID = ?1 AND Endpoint = ?2",
                rusqlite::params![node_id.0 as i64, endpoint.0 as i64],
            )?;
            conn.execute(
                "DELETE FROM Device WHERE NodeID = ?1 AND Endpoint = ?2",
                rusqlite::params![node_id.0 as i64, endpoint.0 as i64],
            )?;
            Ok(())
        })
        .await
    }

    /// Duplicate insertion is a soft-failure: one `UniqueID` row exists per node.
    pub async fn insert_unique_id(&self, unique: UniqueId) -> Result<bool, Error> {
        self.with_conn(move |conn| {
            let result = conn.execute(
                "INSERT INTO UniqueID (NodeID, Name, UniqueID, VendorName, ProductName) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    unique.node_id.0 as i64,
                    format!("{}-{}", unique.vendor_name, unique.product_name),
                    unique.unique_id,
                    unique.vendor_name,
                    unique.product_name,
                ],
            );
            match result {
                Ok(_) => Ok(true),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Ok(false)
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// If the row already exists, returns `true` without touching `value`/`type` (I1).
    /// Otherwise inserts it with `value = NULL` and the given `type`.
    pub async fn create_attribute_entry(
        &self,
        node_id: NodeId,
        endpoint: EndpointId,
        cluster: String,
        attribute: String,
        attr_type: String,
    ) -> Result<bool, Error> {
        self.with_conn(move |conn| {
            let exists: bool = conn.query_row(
                "SELECT 1 FROM Attribute WHERE NodeID = ?1 AND Endpoint = ?2 AND Cluster = ?3 AND Attribute = ?4",
                rusqlite::params![node_id.0 as i64, endpoint.0 as i64, cluster, attribute],
                |_| Ok(true),
            ).unwrap_or(false);
            if exists {
                return Ok(true);
            }
            conn.execute(
                "INSERT INTO Attribute (NodeID, Endpoint, Cluster, Attribute, Type, Value)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
                rusqlite::params![node_id.0 as i64, endpoint.0 as i64, cluster, attribute, attr_type],
            )?;
            Ok(true)
        })
        .await
    }

    /// Overwrites `value`; never touches `type`. Upserts via `ON CONFLICT ... DO UPDATE`, the
    /// same pattern the south-bound device manager's SQLite layer used.
    pub async fn update_attribute_value(
        &self,
        node_id: NodeId,
        endpoint: EndpointId,
        cluster: String,
        attribute: String,
        new_value: String,
    ) -> Result<(), Error> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO Attribute (NodeID, Endpoint, Cluster, Attribute, Type, Value)
                 VALUES (?1, ?2, ?3, ?4, '', ?5)
                 ON CONFLICT(NodeID, Endpoint, Cluster, Attribute)
                 DO UPDATE SET Value = excluded.Value",
                rusqlite::params![node_id.0 as i64, endpoint.0 as i64, cluster, attribute, new_value],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_attribute_value(
        &self,
        node_id: NodeId,
        endpoint: EndpointId,
        cluster: String,
        attribute: String,
    ) -> Result<Option<String>, Error> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT Value FROM Attribute WHERE NodeID = ?1 AND Endpoint = ?2 AND Cluster = ?3 AND Attribute = ?4",
                rusqlite::params![node_id.0 as i64, endpoint.0 as i64, cluster, attribute],
                |row| row.get(0),
            )
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })
        })
        .await
    }

    pub async fn get_all_devices(&self) -> Result<Vec<Device>, Error> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT NodeID, Endpoint, DeviceType, TopicID, VendorName, ProductName, Name FROM Device",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(Device {
                    node_id: NodeId(row.get::<_, i64>(0)? as u64),
                    endpoint: EndpointId(row.get::<_, i64>(1)? as u16),
                    device_type: row.get::<_, i64>(2)? as u32,
                    topic_id: row.get(3)?,
                    vendor_name: row.get(4)?,
                    product_name: row.get(5)?,
                    name: row.get(6)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    pub async fn get_device(&self, node_id: NodeId, endpoint: EndpointId) -> Result<Option<Device>, Error> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT NodeID, Endpoint, DeviceType, TopicID, VendorName, ProductName, Name FROM Device WHERE NodeID = ?1 AND Endpoint = ?2",
                rusqlite::params![node_id.0 as i64, endpoint.0 as i64],
                |row| {
                    Ok(Device {
                        node_id: NodeId(row.get::<_, i64>(0)? as u64),
                        endpoint: EndpointId(row.get::<_, i64>(1)? as u16),
                        device_type: row.get::<_, i64>(2)? as u32,
                        topic_id: row.get(3)?,
                        vendor_name: row.get(4)?,
                        product_name: row.get(5)?,
                        name: row.get(6)?,
                    })
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })
        })
        .await
    }

    pub async fn get_device_by_topic_id(&self, topic_id: String) -> Result<Option<Device>, Error> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT NodeID, Endpoint, DeviceType, TopicID, VendorName, ProductName, Name FROM Device WHERE TopicID = ?1",
                rusqlite::params![topic_id],
                |row| {
                    Ok(Device {
                        node_id: NodeId(row.get::<_, i64>(0)? as u64),
                        endpoint: EndpointId(row.get::<_, i64>(1)? as u16),
                        device_type: row.get::<_, i64>(2)? as u32,
                        topic_id: row.get(3)?,
                        vendor_name: row.get(4)?,
                        product_name: row.get(5)?,
                        name: row.get(6)?,
                    })
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })
        })
        .await
    }

    pub async fn get_attributes_for_device(
        &self,
        node_id: NodeId,
        endpoint: EndpointId,
    ) -> Result<Vec<Attribute>, Error> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT NodeID, Endpoint, Cluster, Attribute, Value, Type FROM Attribute WHERE NodeID = ?1 AND Endpoint = ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![node_id.0 as i64, endpoint.0 as i64], |row| {
                Ok(Attribute {
                    node_id: NodeId(row.get::<_, i64>(0)? as u64),
                    endpoint: EndpointId(row.get::<_, i64>(1)? as u16),
                    cluster: row.get(2)?,
                    attribute: row.get(3)?,
                    value: row.get(4)?,
                    r#type: row.get(5)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    /// Every `(node,endpoint)` pair with at least one tracked attribute -- the universe C9's
    /// auto-discovery loop sweeps for endpoints not yet being polled.
    pub async fn get_all_polled_endpoints(&self) -> Result<Vec<(NodeId, EndpointId)>, Error> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT NodeID, Endpoint FROM Attribute")?;
            let rows = stmt.query_map([], |row| {
                Ok((NodeId(row.get::<_, i64>(0)? as u64), EndpointId(row.get::<_, i64>(1)? as u16)))
            })?;
            rows.collect()
        })
        .await
    }
}

fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS Device (
            NodeID INTEGER NOT NULL,
            Endpoint INTEGER NOT NULL,
            DeviceType INTEGER NOT NULL,
            TopicID TEXT NOT NULL,
            VendorName TEXT NOT NULL DEFAULT '',
            ProductName TEXT NOT NULL DEFAULT '',
            Name TEXT,
            PRIMARY KEY (NodeID, Endpoint)
        );
        CREATE TABLE IF NOT EXISTS UniqueID (
            NodeID INTEGER NOT NULL PRIMARY KEY,
            Name TEXT NOT NULL,
            UniqueID TEXT NOT NULL,
            VendorName TEXT NOT NULL DEFAULT '',
            ProductName TEXT NOT NULL DEFAULT ''
        );
        CREATE TABLE IF NOT EXISTS Attribute (
            NodeID INTEGER NOT NULL,
            Endpoint INTEGER NOT NULL,
            Cluster TEXT NOT NULL,
            Attribute TEXT NOT NULL,
            Type TEXT NOT NULL,
            Value TEXT,
            PRIMARY KEY (NodeID, Endpoint, Cluster, Attribute)
        );",
    )
    .map_err(Error::InitSchema)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_registry() -> Registry {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        Registry { conn: Arc::new(Mutex::new(conn)) }
    }

    #[tokio::test]
    async fn node_ids_start_at_one_and_increment() {
        let reg = memory_registry().await;
        assert_eq!(reg.new_node_id().await.unwrap(), NodeId(1));
        reg.insert_device(Device {
            node_id: NodeId(1),
            endpoint: EndpointId(0),
            topic_id: "t1".into(),
            device_type: 0x100,
            vendor_name: "Acme".into(),
            product_name: "Bulb".into(),
            name: None,
        })
        .await
        .unwrap();
        assert_eq!(reg.new_node_id().await.unwrap(), NodeId(2));
    }

    #[tokio::test]
    async fn duplicate_device_insert_returns_false() {
        let reg = memory_registry().await;
        let device = Device {
            node_id: NodeId(1),
            endpoint: EndpointId(0),
            topic_id: "t1".into(),
            device_type: 0x100,
            vendor_name: "Acme".into(),
            product_name: "Bulb".into(),
            name: None,
        };
        assert!(reg.insert_device(device.clone()).await.unwrap());
        assert!(!reg.insert_device(device).await.unwrap());
    }

    #[tokio::test]
    async fn rename_device_updates_existing_row_only() {
        let reg = memory_registry().await;
        let device = Device {
            node_id: NodeId(1),
            endpoint: EndpointId(0),
            topic_id: "t1".into(),
            device_type: 0x100,
            vendor_name: "Acme".into(),
            product_name: "Bulb".into(),
            name: None,
        };
        reg.insert_device(device).await.unwrap();

        assert!(reg.rename_device(NodeId(1), EndpointId(0), "Kitchen Light".into()).await.unwrap());
        let renamed = reg.get_device(NodeId(1), EndpointId(0)).await.unwrap().unwrap();
        assert_eq!(renamed.name.as_deref(), Some("Kitchen Light"));

        assert!(!reg.rename_device(NodeId(99), EndpointId(0), "Nope".into()).await.unwrap());
    }

    #[tokio::test]
    async fn attribute_type_is_set_once() {
        let reg = memory_registry().await;
        reg.create_attribute_entry(NodeId(1), EndpointId(0), "OnOff".into(), "OnOff".into(), "boolean".into())
            .await
            .unwrap();
        reg.update_attribute_value(NodeId(1), EndpointId(0), "OnOff".into(), "OnOff".into(), "true".into())
            .await
            .unwrap();
        let value = reg
            .get_attribute_value(NodeId(1), EndpointId(0), "OnOff".into(), "OnOff".into())
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("true"));
    }
}
