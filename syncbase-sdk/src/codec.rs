//! The closed action-type registry and bit-exact payload encode/decode.
//!
//! Wire format: one tag byte, followed by a `serde_json`-serialized body.
//! JSON is used (rather than bincode, which the chain-ier example repos in
//! the pack lean on) because the signing path already needs a JSON-shaped
//! canonicalizer (see `canonical.rs`); sharing one serializer for both the
//! wire body and the signing bytes avoids a second schema to keep in sync.

use serde::{Deserialize, Serialize};

use crate::error::SdkError;

/// One-byte tag per action type, exactly as the wire registry specifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    #[serde(rename = "@server/create-server")]
    CreateServer = 0,
    #[serde(rename = "@server/update-server")]
    UpdateServer = 1,
    #[serde(rename = "@server/create-channel")]
    CreateChannel = 2,
    #[serde(rename = "@server/update-channel")]
    UpdateChannel = 3,
    #[serde(rename = "@server/delete-channel")]
    DeleteChannel = 4,
    #[serde(rename = "@server/send-message")]
    SendMessage = 5,
    #[serde(rename = "@server/edit-message")]
    EditMessage = 6,
    #[serde(rename = "@server/delete-message")]
    DeleteMessage = 7,
    #[serde(rename = "@server/set-role")]
    SetRole = 8,
    #[serde(rename = "@server/create-invite")]
    CreateInvite = 9,
    #[serde(rename = "@server/claim-invite")]
    ClaimInvite = 10,
    #[serde(rename = "@server/revoke-invite")]
    RevokeInvite = 11,
}

impl ActionType {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self, SdkError> {
        Ok(match tag {
            0 => ActionType::CreateServer,
            1 => ActionType::UpdateServer,
            2 => ActionType::CreateChannel,
            3 => ActionType::UpdateChannel,
            4 => ActionType::DeleteChannel,
            5 => ActionType::SendMessage,
            6 => ActionType::EditMessage,
            7 => ActionType::DeleteMessage,
            8 => ActionType::SetRole,
            9 => ActionType::CreateInvite,
            10 => ActionType::ClaimInvite,
            11 => ActionType::RevokeInvite,
            other => return Err(SdkError::UnknownActionType(other)),
        })
    }

    /// Only `claim-invite` may be accepted as an optimistic, unverified
    /// append (the joining peer isn't a recognized writer yet). Every other
    /// action type must always have its signature verified.
    pub fn allows_optimistic_skip(self) -> bool {
        matches!(self, ActionType::ClaimInvite)
    }
}

/// Encode a payload as `tag byte ‖ json body`.
pub fn encode(action_type: ActionType, payload: &serde_json::Value) -> Result<Vec<u8>, SdkError> {
    let mut out = vec![action_type.tag()];
    out.extend(serde_json::to_vec(payload)?);
    Ok(out)
}

/// Decode `tag byte ‖ json body` back into `(type, payload)`.
pub fn decode(bytes: &[u8]) -> Result<(ActionType, serde_json::Value), SdkError> {
    let (&tag, body) = bytes
        .split_first()
        .ok_or_else(|| SdkError::MalformedAction("empty action bytes".into()))?;
    let action_type = ActionType::from_tag(tag)?;
    let payload: serde_json::Value = serde_json::from_slice(body)?;
    require_fields(action_type, &payload)?;
    Ok((action_type, payload))
}

/// Required-field check per action type, matching the collection schemas in
/// the data model.
fn require_fields(action_type: ActionType, payload: &serde_json::Value) -> Result<(), SdkError> {
    let required: &[&str] = match action_type {
        ActionType::CreateServer => &["id", "name"],
        ActionType::UpdateServer => &["id"],
        ActionType::CreateChannel => &["channelId", "name"],
        ActionType::UpdateChannel | ActionType::DeleteChannel => &["channelId"],
        ActionType::SendMessage => &["id", "channelId", "content"],
        ActionType::EditMessage | ActionType::DeleteMessage => &["id", "channelId"],
        ActionType::SetRole => &["userId", "role"],
        ActionType::CreateInvite | ActionType::RevokeInvite => &["id"],
        ActionType::ClaimInvite => &["id", "code"],
    };
    let obj = payload
        .as_object()
        .ok_or_else(|| SdkError::MalformedAction("payload must be an object".into()))?;
    for field in required {
        if !obj.contains_key(*field) {
            return Err(SdkError::MalformedAction(format!("missing field {field}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tag_round_trips_for_every_variant() {
        let all = [
            ActionType::CreateServer,
            ActionType::UpdateServer,
            ActionType::CreateChannel,
            ActionType::UpdateChannel,
            ActionType::DeleteChannel,
            ActionType::SendMessage,
            ActionType::EditMessage,
            ActionType::DeleteMessage,
            ActionType::SetRole,
            ActionType::CreateInvite,
            ActionType::ClaimInvite,
            ActionType::RevokeInvite,
        ];
        for (i, a) in all.iter().enumerate() {
            assert_eq!(a.tag(), i as u8);
            assert_eq!(ActionType::from_tag(i as u8).unwrap(), *a);
        }
    }

    #[test]
    fn unknown_tag_errors() {
        assert!(matches!(
            ActionType::from_tag(200),
            Err(SdkError::UnknownActionType(200))
        ));
    }

    #[test]
    fn payload_round_trips() {
        let payload = json!({"id": "s1", "name": "Test", "timestamp": 1});
        let bytes = encode(ActionType::CreateServer, &payload).unwrap();
        let (ty, decoded) = decode(&bytes).unwrap();
        assert_eq!(ty, ActionType::CreateServer);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn delete_channel_payload_without_name_decodes() {
        let bytes = encode(ActionType::DeleteChannel, &json!({"channelId": "c1"})).unwrap();
        let (ty, decoded) = decode(&bytes).unwrap();
        assert_eq!(ty, ActionType::DeleteChannel);
        assert_eq!(decoded, json!({"channelId": "c1"}));
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let bytes = encode(ActionType::SendMessage, &json!({"id": "m1"})).unwrap();
        assert!(matches!(decode(&bytes), Err(SdkError::MalformedAction(_))));
    }

    #[test]
    fn empty_bytes_is_malformed() {
        assert!(matches!(decode(&[]), Err(SdkError::MalformedAction(_))));
    }

    #[test]
    fn only_claim_invite_allows_optimistic_skip() {
        assert!(ActionType::ClaimInvite.allows_optimistic_skip());
        assert!(!ActionType::SendMessage.allows_optimistic_skip());
    }
}
