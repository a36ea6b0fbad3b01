use std::time::Instant;

use futures::FutureExt;
use game_persist::config::Config;
use game_persist::entity::{ClientId, Entity, HubId, NetworkId, Networked};
use game_persist::error::Error;
use game_persist::gateway::{Command, Reply};
use game_persist::load::{load_saved_entity_states, parse_storable_messages};
use game_persist::message::{CursorBufferUpdate, StorableUpdate};
use game_persist::net::Session;
use game_persist::store::{Call, MemoryStore};
use game_persist::world::{Scene, World};
use game_persist::Persistence;

struct Scenario {
    world: World,
    session: Session,
    store: MemoryStore,
    persistence: Persistence,
}

impl Scenario {
    fn new(local: &str) -> Self {
        let mut session = Session::new();
        session.connect(ClientId::from(local));
        session.join(HubId::from("hub1"));

        Self {
            world: World::new(),
            session,
            store: MemoryStore::new(),
            persistence: Persistence::new(Config::default()).unwrap(),
        }
    }

    fn spawn(&mut self, parent: Option<Entity>, nid: &str) -> Entity {
        let networked = Networked::new(NetworkId::from(nid), ClientId::from("peer-b"));
        let entity = self.world.spawn_networked(parent, networked);
        self.world.set_prefab(entity, "media");
        entity
    }

    /// Spawns `A` with the descendants `A.B`, `A.B.D` and `A.C` and an unnetworked child.
    fn spawn_hierarchy(&mut self) -> Entity {
        let a = self.spawn(None, "A");
        let b = self.spawn(Some(a), "A.B");
        self.spawn(Some(b), "A.B.D");
        self.spawn(Some(a), "A.C");
        self.world.spawn(Some(a));
        a
    }

    fn tick(&mut self) {
        self.persistence
            .update(&mut self.world, &self.session, &mut self.store, Instant::now());
    }
}

fn update(nid: &str) -> StorableUpdate {
    StorableUpdate {
        nid: NetworkId::from(nid),
        last_owner_time: 7,
        owner: ClientId::from("peer-c"),
        creator: ClientId::from("peer-c"),
        data: [("volume".to_owned(), serde_json::json!(0.5))]
            .into_iter()
            .collect(),
    }
}

fn cursor(nid: &str) -> CursorBufferUpdate {
    CursorBufferUpdate {
        nid: NetworkId::from(nid),
        owner: ClientId::from("peer-c"),
        component_ids: vec![1],
        data: vec![0, 1, 2],
    }
}

fn call(command: Command, nid: &str) -> Call {
    Call {
        command,
        nid: Some(NetworkId::from(nid)),
    }
}

#[test]
fn save_hierarchy_stores_record_per_entity() {
    let mut s = Scenario::new("peer-a");
    let root = s.spawn_hierarchy();

    let mut pending = s
        .persistence
        .save_entity_state_hierarchy(&mut s.world, &s.session, &mut s.store, root)
        .unwrap();

    // Only observed by the next tick.
    assert!((&mut pending).now_or_never().is_none());
    s.tick();
    let replies = pending.now_or_never().unwrap().unwrap();
    assert_eq!(replies.len(), 4);

    assert_eq!(
        s.store.calls(),
        [
            call(Command::SaveEntityState, "A"),
            call(Command::SaveEntityState, "A.B"),
            call(Command::SaveEntityState, "A.B.D"),
            call(Command::SaveEntityState, "A.C"),
        ]
    );

    for (_, record) in s.store.records() {
        assert_eq!(record.root_nid, NetworkId::from("A"));
        assert!(record.message.is_disjoint());
    }

    let root_record = s.store.get(&NetworkId::from("A")).unwrap();
    assert_eq!(root_record.message.creates.len(), 1);
    assert_eq!(root_record.message.creates[0].creator, ClientId::server());
    assert!(root_record.message.updates.is_empty());

    let child = s.store.get(&NetworkId::from("A.B")).unwrap();
    assert!(child.message.creates.is_empty());
    assert_eq!(child.message.updates[0].owner, ClientId::from("peer-a"));
    assert_eq!(child.message.updates[0].creator, ClientId::server());

    // Every record can be removed on its own.
    let entity = s.world.self_with_descendants(root).into_iter().find(|&entity| {
        s.world
            .networked(entity)
            .is_some_and(|networked| networked.id == NetworkId::from("A.C"))
    });
    let request = s
        .persistence
        .delete_entity_state(&mut s.world, &s.session, &mut s.store, entity.unwrap())
        .unwrap();
    assert!(request.now_or_never().unwrap().is_ok());

    assert_eq!(s.store.len(), 3);
    assert!(s.store.get(&NetworkId::from("A.C")).is_none());
    assert!(s.store.get(&NetworkId::from("A.B.D")).is_some());
}

#[test]
fn save_hierarchy_merges_buffered_updates() {
    let mut s = Scenario::new("peer-a");
    let root = s.spawn_hierarchy();

    let buffer = s.persistence.pending_updates_mut();
    buffer.push(update("A.X"));
    buffer.push(update("A.B"));
    buffer.push(update("A1.Y"));
    buffer.push(update("B.Y"));
    buffer.push(cursor("A.Z"));

    let pending = s
        .persistence
        .save_entity_state_hierarchy(&mut s.world, &s.session, &mut s.store, root)
        .unwrap();

    // Not consumed before the saves are acknowledged.
    assert_eq!(s.persistence.pending_updates().len(), 5);

    s.tick();
    assert_eq!(pending.now_or_never().unwrap().unwrap().len(), 5);

    let unresolved = s.store.get(&NetworkId::from("A.X")).unwrap();
    assert_eq!(unresolved.root_nid, NetworkId::from("A"));
    assert_eq!(unresolved.message.updates, [update("A.X")]);

    let resolved = s.store.get(&NetworkId::from("A.B")).unwrap();
    assert_eq!(resolved.message.updates.len(), 2);
    assert_eq!(resolved.message.updates[1], update("A.B"));

    assert!(s.store.get(&NetworkId::from("A1.Y")).is_none());
    assert!(s.store.get(&NetworkId::from("B.Y")).is_none());
    assert!(s.store.get(&NetworkId::from("A.Z")).is_none());

    let buffer = s.persistence.pending_updates();
    assert_eq!(buffer.len(), 3);
    assert_eq!(buffer.get(&NetworkId::from("A.X")).count(), 0);
    assert_eq!(buffer.get(&NetworkId::from("A1.Y")).count(), 1);
    assert_eq!(buffer.get(&NetworkId::from("B.Y")).count(), 1);
    assert!(buffer
        .get(&NetworkId::from("A.Z"))
        .all(|update| update.is_cursor_buffer()));
}

#[test]
fn rejected_save_keeps_buffered_updates() {
    let mut s = Scenario::new("peer-a");
    let root = s.spawn_hierarchy();
    s.persistence.pending_updates_mut().push(update("A.X"));

    s.store.reject_next(1);
    let pending = s
        .persistence
        .save_entity_state_hierarchy(&mut s.world, &s.session, &mut s.store, root)
        .unwrap();
    s.tick();

    assert!(matches!(
        pending.now_or_never().unwrap(),
        Err(Error::RemoteRejected(_))
    ));
    assert_eq!(s.persistence.pending_updates().len(), 1);
    assert_eq!(s.persistence.in_flight(), 0);
}

#[test]
fn delete_hierarchy_bulk_and_per_descendant() {
    let mut s = Scenario::new("peer-a");
    let root = s.spawn_hierarchy();
    let other = s.spawn(None, "B");

    s.persistence
        .save_entity_state_hierarchy(&mut s.world, &s.session, &mut s.store, root)
        .unwrap();
    let request = s
        .persistence
        .save_entity_state(&mut s.world, &s.session, &mut s.store, other)
        .unwrap();
    assert!(request.now_or_never().unwrap().is_ok());
    s.tick();
    assert_eq!(s.store.len(), 5);
    s.store.clear_calls();

    let pending = s
        .persistence
        .delete_entity_state_hierarchy(&mut s.world, &s.session, &mut s.store, root)
        .unwrap();
    s.tick();
    assert_eq!(pending.now_or_never().unwrap().unwrap().len(), 4);

    assert_eq!(
        s.store.calls(),
        [
            call(Command::DeleteEntityStatesForRootNid, "A"),
            call(Command::DeleteEntityState, "A.B"),
            call(Command::DeleteEntityState, "A.B.D"),
            call(Command::DeleteEntityState, "A.C"),
        ]
    );

    let records = s.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].0, NetworkId::from("B"));

    // The deleting peer is recorded as creator of every node.
    for entity in s.world.self_with_descendants(root) {
        if let Some(networked) = s.world.networked(entity) {
            assert_eq!(networked.creator, ClientId::from("peer-a"));
            assert_eq!(networked.owner, ClientId::from("peer-a"));
        }
    }
}

#[test]
fn delete_hierarchy_consumes_only_resolved_updates() {
    let mut s = Scenario::new("peer-a");
    let root = s.spawn_hierarchy();

    let buffer = s.persistence.pending_updates_mut();
    buffer.push(update("A.B"));
    buffer.push(update("A.X"));
    buffer.push(cursor("A.C"));

    let pending = s
        .persistence
        .delete_entity_state_hierarchy(&mut s.world, &s.session, &mut s.store, root)
        .unwrap();
    s.tick();
    assert!(pending.now_or_never().unwrap().is_ok());

    let buffer = s.persistence.pending_updates();
    assert_eq!(buffer.get(&NetworkId::from("A.B")).count(), 0);
    assert_eq!(buffer.get(&NetworkId::from("A.X")).count(), 1);
    assert_eq!(buffer.get(&NetworkId::from("A.C")).count(), 1);
}

#[test]
fn saved_states_are_attributed_to_server() {
    let mut s = Scenario::new("peer-a");
    let root = s.spawn_hierarchy();

    s.persistence
        .save_entity_state_hierarchy(&mut s.world, &s.session, &mut s.store, root)
        .unwrap();
    s.tick();

    let reply = s
        .persistence
        .list_entity_states(&mut s.store)
        .now_or_never()
        .unwrap()
        .unwrap();
    let list = match reply {
        Reply::EntityStates(list) => list,
        reply => panic!("unexpected reply: {:?}", reply),
    };
    assert_eq!(list.data.len(), 4);

    let messages = parse_storable_messages(list).unwrap();
    for message in &messages {
        assert_eq!(message.from_client_id, Some(ClientId::server()));
        for update in &message.updates {
            assert_eq!(update.owner, ClientId::server());
        }
    }

    let count = load_saved_entity_states(&mut s.store, &mut s.session, &HubId::from("hub1"))
        .now_or_never()
        .unwrap()
        .unwrap();
    assert_eq!(count, 4);
    assert_eq!(s.session.pending_messages(), messages.as_slice());
}

#[test]
fn load_requires_connection() {
    let mut s = Scenario::new("peer-a");
    s.session.disconnect();

    let res = load_saved_entity_states(&mut s.store, &mut s.session, &HubId::from("hub1"))
        .now_or_never()
        .unwrap();
    assert!(matches!(res, Err(Error::NotConnected)));
    assert!(s.store.calls().is_empty());
}

#[test]
fn load_discards_records_of_previous_hub() {
    let mut s = Scenario::new("peer-a");
    let root = s.spawn_hierarchy();

    s.persistence
        .save_entity_state_hierarchy(&mut s.world, &s.session, &mut s.store, root)
        .unwrap();
    s.tick();

    s.session.join(HubId::from("hub2"));

    let count = load_saved_entity_states(&mut s.store, &mut s.session, &HubId::from("hub1"))
        .now_or_never()
        .unwrap()
        .unwrap();
    assert_eq!(count, 0);
    assert!(s.session.pending_messages().is_empty());
}

#[test]
fn reset_cancels_pending_operations() {
    let mut s = Scenario::new("peer-a");
    let root = s.spawn_hierarchy();

    let pending = s
        .persistence
        .save_entity_state_hierarchy(&mut s.world, &s.session, &mut s.store, root)
        .unwrap();
    s.persistence.reset();

    assert!(matches!(
        pending.now_or_never().unwrap(),
        Err(Error::Disconnected)
    ));
    assert_eq!(s.persistence.in_flight(), 0);
}

#[test]
fn network_instantiated_creator() {
    let mut s = Scenario::new("peer-a");
    let root = s.spawn_hierarchy();
    let child = s.spawn(Some(root), "A.E");
    s.session.set_network_instantiated(child, true);

    let request = s
        .persistence
        .save_entity_state(&mut s.world, &s.session, &mut s.store, child)
        .unwrap();
    assert!(request.now_or_never().unwrap().is_ok());
    assert_eq!(s.world.networked(child).unwrap().creator, ClientId::server());

    let record = s.store.get(&NetworkId::from("A.E")).unwrap();
    assert_eq!(record.root_nid, NetworkId::from("A"));

    let request = s
        .persistence
        .delete_entity_state(&mut s.world, &s.session, &mut s.store, child)
        .unwrap();
    assert!(request.now_or_never().unwrap().is_ok());
    assert_eq!(
        s.world.networked(child).unwrap().creator,
        ClientId::from("peer-a")
    );
    assert!(s.store.get(&NetworkId::from("A.E")).is_none());
}

#[test]
fn hierarchy_operations_require_connection() {
    let mut s = Scenario::new("peer-a");
    let root = s.spawn_hierarchy();
    s.session.disconnect();

    let res = s
        .persistence
        .save_entity_state_hierarchy(&mut s.world, &s.session, &mut s.store, root);
    assert!(matches!(res, Err(Error::NotConnected)));

    let res = s
        .persistence
        .delete_entity_state_hierarchy(&mut s.world, &s.session, &mut s.store, root);
    assert!(matches!(res, Err(Error::NotConnected)));

    assert!(s.store.calls().is_empty());
}

#[test]
fn hierarchy_operations_require_network_id() {
    let mut s = Scenario::new("peer-a");
    let root = s.world.spawn(None);

    let res = s
        .persistence
        .save_entity_state_hierarchy(&mut s.world, &s.session, &mut s.store, root);
    assert!(matches!(res, Err(Error::InvalidState(_))));

    let res = s
        .persistence
        .delete_entity_state_hierarchy(&mut s.world, &s.session, &mut s.store, root);
    assert!(matches!(res, Err(Error::InvalidState(_))));

    assert!(s.store.calls().is_empty());
}
