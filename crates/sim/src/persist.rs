//! Save documents.
//!
//! Persistence follows an "enter node / read or write fields / exit node"
//! protocol expressed by [`DocumentWriter`] and [`DocumentReader`]. The JSON tree
//! implementation is what the session ships over the wire and what autosaves
//! hand to [`crate::SimulationHooks::on_save`].
//!
//! Maps are written as ordered `(key, value)` record lists. A region's parent
//! faction bundle is stored in the region's own fields and left out of the
//! per-faction collection; loading merges it back in.

use crate::bundle::{RegionStateBundle, Thing, ThingId};
use crate::region::Region;
use crate::world::{TimeSpeed, WorldState};
use colonysync_core::{FactionId, IdBlock, IdError, OwnerId, RegionId, SimTick};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

/// Failures reading or writing documents.
#[derive(Debug, Error)]
pub enum PersistError {
    /// A node the reader entered does not exist.
    #[error("missing node {0}")]
    MissingNode(String),
    /// A required field is absent.
    #[error("missing field {0}")]
    MissingField(String),
    /// A value did not (de)serialize.
    #[error("document value error: {0}")]
    Json(#[from] serde_json::Error),
    /// A stored id block is malformed.
    #[error(transparent)]
    IdBlock(#[from] IdError),
    /// A value is out of range.
    #[error("invalid document: {0}")]
    Invalid(String),
}

/// Write side of the document protocol.
pub trait DocumentWriter {
    /// Open a child node; later writes go into it.
    fn enter_node(&mut self, name: &str);
    /// Close the innermost open node.
    fn exit_node(&mut self);
    /// Write a field of the current node.
    fn write_value<T: Serialize + ?Sized>(&mut self, label: &str, value: &T) -> Result<(), PersistError>;
}

/// Read side of the document protocol.
pub trait DocumentReader {
    /// Descend into a child node.
    fn enter_node(&mut self, name: &str) -> Result<(), PersistError>;
    /// Return to the parent node.
    fn exit_node(&mut self);
    /// Read a field of the current node, `None` when absent.
    fn read_value<T: DeserializeOwned>(&self, label: &str) -> Result<Option<T>, PersistError>;
    /// Names of the child nodes of the current node, in document order.
    fn child_nodes(&self) -> Vec<String>;
    /// Current position, for error messages.
    fn path(&self) -> String;
}

fn require<T: DeserializeOwned>(reader: &impl DocumentReader, label: &str) -> Result<T, PersistError> {
    reader
        .read_value(label)?
        .ok_or_else(|| PersistError::MissingField(format!("{}/{label}", reader.path())))
}

#[derive(Serialize, Deserialize)]
struct Record<K, V> {
    key: K,
    value: V,
}

/// Write a map as an ordered `(key, value)` record list.
pub fn write_records<'a, K, V, W>(
    writer: &mut W,
    label: &str,
    entries: impl IntoIterator<Item = (&'a K, &'a V)>,
) -> Result<(), PersistError>
where
    K: Serialize + 'a,
    V: Serialize + 'a,
    W: DocumentWriter,
{
    let records: Vec<Record<&K, &V>> = entries
        .into_iter()
        .map(|(key, value)| Record { key, value })
        .collect();
    writer.write_value(label, &records)
}

/// Read a record list written by [`write_records`]. Absent lists read as empty.
pub fn read_records<K, V, R>(reader: &R, label: &str) -> Result<BTreeMap<K, V>, PersistError>
where
    K: DeserializeOwned + Ord,
    V: DeserializeOwned,
    R: DocumentReader,
{
    let records: Vec<Record<K, V>> = reader.read_value(label)?.unwrap_or_default();
    Ok(records
        .into_iter()
        .map(|record| (record.key, record.value))
        .collect())
}

/// Write an id block as base64; absent blocks write nothing.
pub fn write_id_block<W: DocumentWriter>(
    writer: &mut W,
    label: &str,
    block: Option<&IdBlock>,
) -> Result<(), PersistError> {
    match block {
        Some(block) => writer.write_value(label, &block.to_base64()),
        None => Ok(()),
    }
}

/// Read an id block written by [`write_id_block`].
pub fn read_id_block<R: DocumentReader>(reader: &R, label: &str) -> Result<Option<IdBlock>, PersistError> {
    match reader.read_value::<String>(label)? {
        Some(text) => Ok(Some(IdBlock::from_base64(&text)?)),
        None => Ok(None),
    }
}

/// Builds a JSON tree.
#[derive(Debug)]
pub struct JsonWriter {
    stack: Vec<(String, Map<String, Value>)>,
}

impl Default for JsonWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonWriter {
    /// Writer positioned at an empty root object.
    pub fn new() -> Self {
        Self {
            stack: vec![(String::new(), Map::new())],
        }
    }

    /// Close any open nodes and return the root.
    pub fn finish(mut self) -> Value {
        while self.stack.len() > 1 {
            self.exit_node();
        }
        match self.stack.pop() {
            Some((_, root)) => Value::Object(root),
            None => Value::Object(Map::new()),
        }
    }
}

impl DocumentWriter for JsonWriter {
    fn enter_node(&mut self, name: &str) {
        self.stack.push((name.to_string(), Map::new()));
    }

    fn exit_node(&mut self) {
        if self.stack.len() < 2 {
            warn!("exit_node at document root");
            return;
        }
        if let Some((name, node)) = self.stack.pop() {
            if let Some((_, parent)) = self.stack.last_mut() {
                parent.insert(name, Value::Object(node));
            }
        }
    }

    fn write_value<T: Serialize + ?Sized>(&mut self, label: &str, value: &T) -> Result<(), PersistError> {
        let value = serde_json::to_value(value)?;
        if let Some((_, node)) = self.stack.last_mut() {
            node.insert(label.to_string(), value);
        }
        Ok(())
    }
}

/// Walks a JSON tree.
#[derive(Debug)]
pub struct JsonReader {
    root: Value,
    path: Vec<String>,
}

impl JsonReader {
    /// Reader positioned at the root of `root`.
    pub fn new(root: Value) -> Self {
        Self {
            root,
            path: Vec::new(),
        }
    }

    /// Parse a serialized document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PersistError> {
        Ok(Self::new(serde_json::from_slice(bytes)?))
    }

    fn current(&self) -> Option<&Value> {
        self.path
            .iter()
            .try_fold(&self.root, |node, segment| node.get(segment))
    }
}

impl DocumentReader for JsonReader {
    fn enter_node(&mut self, name: &str) -> Result<(), PersistError> {
        match self.current().and_then(|node| node.get(name)) {
            Some(Value::Object(_)) => {
                self.path.push(name.to_string());
                Ok(())
            }
            _ => Err(PersistError::MissingNode(format!("{}/{name}", self.path()))),
        }
    }

    fn exit_node(&mut self) {
        self.path.pop();
    }

    fn read_value<T: DeserializeOwned>(&self, label: &str) -> Result<Option<T>, PersistError> {
        match self.current().and_then(|node| node.get(label)) {
            Some(value) => Ok(Some(T::deserialize(value)?)),
            None => Ok(None),
        }
    }

    fn child_nodes(&self) -> Vec<String> {
        match self.current() {
            Some(Value::Object(map)) => map
                .iter()
                .filter(|(_, value)| value.is_object())
                .map(|(key, _)| key.clone())
                .collect(),
            _ => Vec::new(),
        }
    }

    fn path(&self) -> String {
        format!("/{}", self.path.join("/"))
    }
}

fn write_bundle<W: DocumentWriter>(writer: &mut W, bundle: &RegionStateBundle) -> Result<(), PersistError> {
    writer.write_value("designations", &bundle.designations)?;
    writer.write_value("areas", &bundle.areas)?;
    writer.write_value("zones", &bundle.zones)?;
    write_records(writer, "forbidden", &bundle.forbidden)?;
    writer.write_value("zoneCounter", &bundle.zone_counter)
}

fn read_bundle<R: DocumentReader>(reader: &R) -> Result<RegionStateBundle, PersistError> {
    let mut bundle = RegionStateBundle {
        designations: reader.read_value("designations")?.unwrap_or_default(),
        areas: reader.read_value("areas")?.unwrap_or_default(),
        zones: reader.read_value("zones")?.unwrap_or_default(),
        forbidden: read_records(reader, "forbidden")?,
        zone_counter: reader.read_value("zoneCounter")?.unwrap_or_default(),
        ..RegionStateBundle::default()
    };
    bundle.rebuild_slot_groups();
    Ok(bundle)
}

/// Write a region into the current node.
pub fn save_region<W: DocumentWriter>(writer: &mut W, region: &Region) -> Result<(), PersistError> {
    if region.active.as_ref() != Some(&region.parent) {
        warn!(
            region = %region.id,
            "saving while the active region state is not the parent faction's"
        );
    }

    writer.write_value("id", &region.id.0)?;
    writer.write_value("isPlayerHome", &region.primary_home)?;
    writer.write_value("parentFaction", &region.parent)?;
    writer.write_value("cells", &region.cells)?;
    write_id_block(writer, "regionIdBlock", region.id_block.as_ref())?;
    writer.write_value("timer", &region.timer)?;
    writer.write_value("timeSpeed", &region.speed)?;
    write_records(writer, "things", &region.things)?;

    if let Some(baseline) = region.bundles.get(&region.parent) {
        write_bundle(writer, baseline)?;
    }

    writer.enter_node("ownerBundles");
    for (faction, bundle) in &region.bundles {
        if faction == &region.parent {
            continue;
        }
        writer.enter_node(faction.as_str());
        write_bundle(writer, bundle)?;
        writer.exit_node();
    }
    writer.exit_node();
    Ok(())
}

/// Read a region from the current node. The parent faction's bundle is active.
pub fn load_region<R: DocumentReader>(reader: &mut R) -> Result<Region, PersistError> {
    let id: i32 = require(&*reader, "id")?;
    if id < 0 {
        return Err(PersistError::Invalid(format!("negative region id {id}")));
    }
    let parent: FactionId = require(&*reader, "parentFaction")?;
    let primary_home: bool = reader.read_value("isPlayerHome")?.unwrap_or(false);

    let mut region = Region::new(RegionId(id), parent.clone(), primary_home);
    region.cells = reader
        .read_value("cells")?
        .unwrap_or(crate::region::DEFAULT_REGION_CELLS);
    region.id_block = read_id_block(&*reader, "regionIdBlock")?;
    region.timer = reader.read_value("timer")?.unwrap_or(SimTick::ZERO);
    region.speed = reader.read_value("timeSpeed")?.unwrap_or_default();
    region.things = read_records::<ThingId, Thing, _>(&*reader, "things")?;

    let mut bundles = BTreeMap::new();
    if reader.enter_node("ownerBundles").is_ok() {
        for name in reader.child_nodes() {
            reader.enter_node(&name)?;
            let bundle = read_bundle(&*reader);
            reader.exit_node();
            bundles.insert(FactionId::new(name), bundle?);
        }
        reader.exit_node();
    }
    if bundles.contains_key(&parent) {
        warn!(region = id, %parent, "saved owner bundles include the parent faction");
    }
    bundles.insert(parent, read_bundle(&*reader)?);
    region.bundles = bundles;
    Ok(region)
}

/// Write the world and all its regions.
///
/// Regions must not have their id block bound while saving.
pub fn save_world<W: DocumentWriter>(writer: &mut W, world: &WorldState) -> Result<(), PersistError> {
    writer.enter_node("world");
    writer.write_value("worldId", &world.world_id)?;
    writer.write_value("timer", &world.timer)?;
    writer.write_value("sessionId", &world.session_id)?;
    write_records(writer, "playerFactions", &world.owner_factions)?;
    writer.write_value("timeSpeed", &world.speed)?;
    write_id_block(writer, "globalIdBlock", world.global_block.as_ref())?;
    writer.exit_node();

    writer.enter_node("regions");
    for region in world.regions.values() {
        writer.enter_node(&region.id.0.to_string());
        save_region(writer, region)?;
        writer.exit_node();
    }
    writer.exit_node();
    Ok(())
}

/// Read a world written by [`save_world`].
pub fn load_world<R: DocumentReader>(reader: &mut R) -> Result<WorldState, PersistError> {
    reader.enter_node("world")?;
    let mut world = WorldState::new();
    world.world_id = require(&*reader, "worldId")?;
    world.timer = reader.read_value("timer")?.unwrap_or(SimTick::ZERO);
    world.session_id = reader.read_value("sessionId")?.unwrap_or(world.session_id);
    world.owner_factions = read_records::<OwnerId, FactionId, _>(&*reader, "playerFactions")?;
    world.speed = reader.read_value::<TimeSpeed>("timeSpeed")?.unwrap_or_default();
    world.global_block = read_id_block(&*reader, "globalIdBlock")?;
    reader.exit_node();

    if reader.enter_node("regions").is_ok() {
        for name in reader.child_nodes() {
            reader.enter_node(&name)?;
            let region = load_region(reader);
            reader.exit_node();
            let region = region?;
            world.regions.insert(region.id, region);
        }
        reader.exit_node();
    }
    Ok(world)
}

/// Serialize the world to document bytes.
pub fn world_to_bytes(world: &WorldState) -> Result<Vec<u8>, PersistError> {
    let mut writer = JsonWriter::new();
    save_world(&mut writer, world)?;
    Ok(serde_json::to_vec(&writer.finish())?)
}

/// Serialize one region to document bytes.
pub fn region_to_bytes(region: &Region) -> Result<Vec<u8>, PersistError> {
    let mut writer = JsonWriter::new();
    writer.enter_node("region");
    save_region(&mut writer, region)?;
    writer.exit_node();
    Ok(serde_json::to_vec(&writer.finish())?)
}

/// Parse region document bytes written by [`region_to_bytes`].
pub fn region_from_bytes(bytes: &[u8]) -> Result<Region, PersistError> {
    let mut reader = JsonReader::from_slice(bytes)?;
    reader.enter_node("region")?;
    load_region(&mut reader)
}
