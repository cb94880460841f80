//! Persistence of the indexed entities.

use crate::models::{EventRecord, Loan, Request};
use crate::serialization::Version;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Mutex;
use typenum::U1;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum EntityKind {
    Request,
    Loan,
    Event,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Request, EntityKind::Loan, EntityKind::Event];
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Entity {
    Request(Request),
    Loan(Loan),
    Event(EventRecord),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Request(_) => EntityKind::Request,
            Entity::Loan(_) => EntityKind::Loan,
            Entity::Event(_) => EntityKind::Event,
        }
    }

    pub fn id(&self) -> String {
        match self {
            Entity::Request(request) => request.id.to_string(),
            Entity::Loan(loan) => loan.id.to_string(),
            Entity::Event(record) => record.id.clone(),
        }
    }
}

/// Keyed storage for entities. Entities are only ever inserted or replaced,
/// never deleted.
#[cfg_attr(test, mockall::automock)]
pub trait EntityStore: Send + Sync {
    fn load(&self, kind: EntityKind, id: &str) -> Result<Option<Entity>>;

    /// Writes all entities or, on error, none of them.
    fn upsert_all(&self, entities: Vec<Entity>) -> Result<()>;

    fn upsert(&self, entity: Entity) -> Result<()> {
        self.upsert_all(vec![entity])
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    entities: Mutex<HashMap<(EntityKind, String), Entity>>,
}

#[derive(Deserialize, Serialize)]
struct Snapshot {
    version: Version<U1>,
    entities: Vec<Entity>,
}

impl InMemoryStore {
    pub fn with_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        Self {
            entities: Mutex::new(
                entities
                    .into_iter()
                    .map(|entity| ((entity.kind(), entity.id()), entity))
                    .collect(),
            ),
        }
    }

    /// All entities ordered by kind and then id.
    pub fn entities(&self) -> Vec<Entity> {
        let entities = self.entities.lock().expect("mutex should never be poisoned");
        let mut entities = entities
            .iter()
            .map(|(key, entity)| (key.clone(), entity.clone()))
            .collect::<Vec<_>>();
        entities.sort_by(|(a, _), (b, _)| a.cmp(b));
        entities.into_iter().map(|(_, entity)| entity).collect()
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.entities
            .lock()
            .expect("mutex should never be poisoned")
            .keys()
            .filter(|(kind_, _)| *kind_ == kind)
            .count()
    }

    pub fn read(reader: impl Read) -> Result<Self> {
        let snapshot: Snapshot = bincode::deserialize_from(reader)?;
        Ok(Self::with_entities(snapshot.entities))
    }

    pub fn write_to(&self, writer: impl Write) -> Result<()> {
        let snapshot = Snapshot {
            version: Version::default(),
            entities: self.entities(),
        };
        bincode::serialize_into(writer, &snapshot)?;
        Ok(())
    }

    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("couldn't open {}", path.display()))?;
        let store = Self::read(BufReader::new(file))
            .with_context(|| format!("failed to read store snapshot {}", path.display()))?;
        log::info!(
            "Loaded {} entities from store snapshot {}",
            store.entities().len(),
            path.display()
        );
        Ok(store)
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        // Write to tmp file until complete and then rename.
        let temp_path = path.as_ref().with_extension("temp");
        {
            let temp_file = File::create(&temp_path)
                .with_context(|| format!("couldn't create {}", temp_path.display()))?;
            let mut buffered_writer = BufWriter::new(temp_file);
            self.write_to(&mut buffered_writer)?;
            buffered_writer.flush()?;
        }
        fs::rename(temp_path, path)?;
        Ok(())
    }
}

impl EntityStore for InMemoryStore {
    fn load(&self, kind: EntityKind, id: &str) -> Result<Option<Entity>> {
        Ok(self
            .entities
            .lock()
            .expect("mutex should never be poisoned")
            .get(&(kind, id.to_string()))
            .cloned())
    }

    fn upsert_all(&self, entities: Vec<Entity>) -> Result<()> {
        let mut stored = self.entities.lock().expect("mutex should never be poisoned");
        for entity in entities {
            stored.insert((entity.kind(), entity.id()), entity);
        }
        Ok(())
    }
}
