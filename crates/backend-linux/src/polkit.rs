use std::collections::HashMap;

use zbus::zvariant::OwnedValue;
use zbus::Connection;

use crate::BackendError;

const ALLOW_USER_INTERACTION: u32 = 1;

/// Asks polkit whether this process may use `device`, letting the agent
/// show an authentication dialog. Resolves once the user answers.
pub async fn check_device_access(action_id: &str, device: &str) -> Result<bool, BackendError> {
    let conn = Connection::system().await?;

    // Subject ("unix-process", {pid, start-time}); start-time 0 lets polkit
    // look it up.
    let mut subject_details: HashMap<String, OwnedValue> = HashMap::new();
    subject_details.insert("pid".to_string(), OwnedValue::from(std::process::id()));
    subject_details.insert("start-time".to_string(), OwnedValue::from(0u64));
    let subject = ("unix-process", subject_details);

    // details a{ss}; cancellation id left empty
    let mut details: HashMap<String, String> = HashMap::new();
    details.insert("device".to_string(), device.to_string());

    let authority = zbus::Proxy::new(
        &conn,
        "org.freedesktop.PolicyKit1",
        "/org/freedesktop/PolicyKit1/Authority",
        "org.freedesktop.PolicyKit1.Authority",
    )
    .await?;
    // (IsAuthorized, IsChallenge, Details)
    let (authorized, _challenge, _details): (bool, bool, HashMap<String, OwnedValue>) = authority
        .call(
            "CheckAuthorization",
            &(subject, action_id, details, ALLOW_USER_INTERACTION, ""),
        )
        .await?;
    Ok(authorized)
}
