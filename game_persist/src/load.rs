//! Loading of saved entity states
//!
//! Saved records represent durable state that no currently connected peer authored. Before they
//! are applied they are attributed to the backend identity.

use crate::entity::{ClientId, HubId};
use crate::error::Error;
use crate::gateway::{Channel, Command, EntityStateList, Payload};
use crate::message::StorableMessage;
use crate::net::Network;

/// Decodes all records of `list` and attributes them to the backend.
pub fn parse_storable_messages(list: EntityStateList) -> Result<Vec<StorableMessage>, Error> {
    let server = ClientId::server();

    list.data
        .into_iter()
        .map(|state| -> Result<StorableMessage, Error> {
            let mut message: StorableMessage = serde_json::from_str(&state.blob)?;
            message.reattribute(&server);
            Ok(message)
        })
        .collect()
}

pub async fn fetch_saved_entity_states<C>(channel: &mut C) -> Result<Vec<StorableMessage>, Error>
where
    C: Channel + ?Sized,
{
    let request = channel.push(Command::ListEntityStates, Payload::None);
    let list = request
        .await?
        .into_entity_states()
        .ok_or(Error::UnexpectedReply(Command::ListEntityStates))?;

    parse_storable_messages(list)
}

/// Fetches all saved entity states of `hub` and queues them on the network receive path.
///
/// Returns the number of queued messages. See [`queue_saved_entity_states`] for the case of the
/// session leaving `hub` while the request was in flight.
pub async fn load_saved_entity_states<C, N>(
    channel: &mut C,
    network: &mut N,
    hub: &HubId,
) -> Result<usize, Error>
where
    C: Channel + ?Sized,
    N: Network + ?Sized,
{
    if network.local_client_id().is_none() {
        return Err(Error::NotConnected);
    }

    let messages = fetch_saved_entity_states(channel).await?;
    queue_saved_entity_states(network, hub, messages)
}

/// Queues `messages` fetched for `hub` on the network receive path.
///
/// The records are discarded if the session is no longer in `hub`, they belong to the previous
/// room. Returns the number of queued messages.
pub fn queue_saved_entity_states<N>(
    network: &mut N,
    hub: &HubId,
    messages: Vec<StorableMessage>,
) -> Result<usize, Error>
where
    N: Network + ?Sized,
{
    if network.hub_id() != Some(hub) {
        tracing::debug!(
            "discarding {} saved entity states of {}: left hub",
            messages.len(),
            hub
        );
        return Ok(0);
    }

    if network.local_client_id().is_none() {
        return Err(Error::NotConnected);
    }

    let count = messages.len();
    tracing::debug!("loaded {} saved entity states of {}", count, hub);

    for message in messages {
        network.push_pending_message(message);
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::{load_saved_entity_states, parse_storable_messages, queue_saved_entity_states};
    use crate::entity::{ClientId, HubId, NetworkId};
    use crate::error::Error;
    use crate::gateway::{EntityState, EntityStateList};
    use crate::message::{StorableMessage, StorableUpdate};
    use crate::net::Session;
    use crate::store::MemoryStore;

    #[test]
    fn parse_storable_messages_reattributes() {
        let mut message = StorableMessage::new();
        message.from_client_id = Some(ClientId::from("peer"));
        message.updates.push(StorableUpdate {
            nid: NetworkId::from("r1.c1"),
            last_owner_time: 3,
            owner: ClientId::from("peer"),
            creator: ClientId::from("peer"),
            data: Default::default(),
        });

        let list = EntityStateList {
            data: vec![EntityState {
                nid: NetworkId::from("r1.c1"),
                blob: serde_json::to_string(&message).unwrap(),
            }],
        };

        let messages = parse_storable_messages(list).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].from_client_id, Some(ClientId::server()));
        assert!(messages[0].updates[0].owner.is_server());
        // The creator is part of the stored state and stays untouched.
        assert_eq!(messages[0].updates[0].creator, ClientId::from("peer"));
    }

    #[test]
    fn parse_storable_messages_invalid_blob() {
        let list = EntityStateList {
            data: vec![EntityState {
                nid: NetworkId::from("r1"),
                blob: String::from("{"),
            }],
        };

        assert!(matches!(
            parse_storable_messages(list),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn load_saved_entity_states_not_connected() {
        let mut store = MemoryStore::new();
        let mut session = Session::new();

        let res = load_saved_entity_states(&mut store, &mut session, &HubId::from("hub1"))
            .now_or_never()
            .unwrap();
        assert!(matches!(res, Err(Error::NotConnected)));
        assert!(store.calls().is_empty());
    }

    #[test]
    fn queue_saved_entity_states_after_hub_switch() {
        let mut session = Session::new();
        session.connect(ClientId::from("local"));
        session.join(HubId::from("hub1"));

        // The list request for hub1 resolves after the switch to hub2.
        session.join(HubId::from("hub2"));
        let messages = vec![StorableMessage::new(), StorableMessage::new()];
        let count = queue_saved_entity_states(&mut session, &HubId::from("hub1"), messages).unwrap();

        assert_eq!(count, 0);
        assert!(session.pending_messages().is_empty());
    }

    #[test]
    fn queue_saved_entity_states_same_hub() {
        let mut session = Session::new();
        session.connect(ClientId::from("local"));
        session.join(HubId::from("hub1"));

        let messages = vec![StorableMessage::new()];
        let count = queue_saved_entity_states(&mut session, &HubId::from("hub1"), messages).unwrap();

        assert_eq!(count, 1);
        assert_eq!(session.pending_messages().len(), 1);
    }
}
