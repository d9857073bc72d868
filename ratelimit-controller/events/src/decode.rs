use ratelimit_controller_api::events as proto;
use ratelimit_controller_core::artifact::{
    Application, ApplicationKeyMapping, ApplicationMapping, Event, Lifecycle, SubscribedApi,
    Subscription,
};
use tracing::warn;

/// Asks the controller to refetch the full catalog.
pub const ALL_EVENTS: &str = "ALL_EVENTS";

/// Decodes an upstream event. Events of an unknown type, or missing the
/// payload their type requires, are logged and dropped.
pub fn decode(event: proto::Event) -> Option<Event> {
    let proto::Event {
        r#type: kind,
        timestamp,
        application,
        subscription,
        application_mapping,
        application_key_mapping,
        ..
    } = event;

    if kind == ALL_EVENTS {
        return Some(Event::Resync);
    }

    let Some((entity, lifecycle)) = split_type(&kind) else {
        warn!(event_type = %kind, "Dropping event of unknown type");
        return None;
    };
    let timestamp = (timestamp != 0).then_some(timestamp);

    let event = match entity {
        Entity::Application => application.map(|a| {
            Event::Application(
                lifecycle,
                Application {
                    uuid: a.uuid,
                    name: a.name,
                    owner: a.owner,
                    organization: a.organization,
                    attributes: a.attributes.into_iter().collect(),
                    timestamp,
                },
            )
        }),
        Entity::Subscription => subscription.map(|s| {
            let api = s.subscribed_api.unwrap_or_default();
            Event::Subscription(
                lifecycle,
                Subscription {
                    uuid: s.uuid,
                    organization: s.organization,
                    sub_status: s.sub_status,
                    subscribed_api: SubscribedApi {
                        name: api.name,
                        version: api.version,
                    },
                    ratelimit_tier: s.ratelimit_tier,
                    timestamp,
                },
            )
        }),
        Entity::ApplicationMapping => application_mapping.map(|m| {
            Event::ApplicationMapping(
                lifecycle,
                ApplicationMapping {
                    uuid: m.uuid,
                    application_ref: m.application_ref,
                    subscription_ref: m.subscription_ref,
                    organization: m.organization,
                },
            )
        }),
        Entity::KeyMapping => application_key_mapping.map(|k| {
            Event::KeyMapping(
                lifecycle,
                ApplicationKeyMapping {
                    application_uuid: k.application_uuid,
                    security_scheme: k.security_scheme,
                    application_identifier: k.application_identifier,
                    key_type: k.key_type,
                    env_id: k.env_id,
                    organization: k.organization,
                },
            )
        }),
    };

    if event.is_none() {
        warn!(event_type = %kind, "Dropping event without a payload");
    }
    event
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Entity {
    Application,
    Subscription,
    ApplicationMapping,
    KeyMapping,
}

fn split_type(kind: &str) -> Option<(Entity, Lifecycle)> {
    let (entity, lifecycle) = kind.rsplit_once('_')?;
    let entity = match entity {
        "APPLICATION" => Entity::Application,
        "SUBSCRIPTION" => Entity::Subscription,
        "APPLICATION_MAPPING" => Entity::ApplicationMapping,
        "APPLICATION_KEY_MAPPING" => Entity::KeyMapping,
        _ => return None,
    };
    let lifecycle = match lifecycle {
        "CREATED" => Lifecycle::Created,
        "UPDATED" => Lifecycle::Updated,
        "DELETED" => Lifecycle::Deleted,
        _ => return None,
    };
    Some((entity, lifecycle))
}
