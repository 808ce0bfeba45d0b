//! Builders for common AMI actions.
//!
//! Every action is just an ordered field mapping handed to
//! [`Manager::request`](crate::Manager::request); these functions build the
//! mappings and validate them before anything touches the wire. Repeated
//! logical fields are keyed with an index suffix (`Codecs[0]`, `Codecs[1]`)
//! that the wire formatter strips back to the bare name.

use crate::error::AmiError;

/// Ordered field mapping for one action.
pub type ActionFields = Vec<(String, String)>;

const DEFAULT_CONTEXT: &str = "from-internal";

/// `Login` action. `events` maps to `Events: on|off`.
pub fn login(username: &str, secret: &str, events: bool) -> ActionFields {
    vec![
        ("Action".to_string(), "Login".to_string()),
        ("UserName".to_string(), username.to_string()),
        ("Secret".to_string(), secret.to_string()),
        (
            "Events".to_string(),
            if events { "on" } else { "off" }.to_string(),
        ),
    ]
}

/// `Logoff` action.
pub fn logoff() -> ActionFields {
    vec![("Action".to_string(), "LogOff".to_string())]
}

/// `CoreShowChannels` action; the reply arrives as an `EventList` burst.
pub fn core_show_channels() -> ActionFields {
    vec![("Action".to_string(), "CoreShowChannels".to_string())]
}

/// Parameters for an `Originate` action.
///
/// `..Default::default()` fills the dialplan conventions: priority 1,
/// asynchronous origination, 15 second timeout, `from-internal` context.
#[derive(Debug, Clone)]
pub struct OriginateRequest {
    /// Local endpoint placing the call; the channel is built as
    /// `Local/<originator>@<context>`.
    pub originator: String,
    /// Extension to call.
    pub extension: String,
    pub priority: u32,
    pub run_async: bool,
    pub timeout_secs: u64,
    pub context: String,
    /// Caller ID; defaults to the extension when unset.
    pub caller_id: Option<String>,
    /// Dialplan application to connect to. Requires `app_data`.
    pub application: Option<String>,
    /// Data for `application`. Requires `application`.
    pub app_data: Option<String>,
    pub account: Option<String>,
    pub early_media: Option<bool>,
    pub codecs: Vec<String>,
    pub other_channel_id: Option<String>,
    /// Channel variables, one `name=value` entry per element.
    pub variables: Vec<String>,
}

impl Default for OriginateRequest {
    fn default() -> Self {
        Self {
            originator: String::new(),
            extension: String::new(),
            priority: 1,
            run_async: true,
            timeout_secs: 15,
            context: DEFAULT_CONTEXT.to_string(),
            caller_id: None,
            application: None,
            app_data: None,
            account: None,
            early_media: None,
            codecs: Vec::new(),
            other_channel_id: None,
            variables: Vec::new(),
        }
    }
}

/// Build an `Originate` action.
///
/// `Application` and `Data` are mutually dependent: supplying one without
/// the other is rejected before submission.
pub fn originate(request: &OriginateRequest) -> Result<ActionFields, AmiError> {
    match (&request.application, &request.app_data) {
        (Some(_), None) => {
            return Err(AmiError::MalformedAction(
                "Originate with \"Application\" requires \"Data\"".to_string(),
            ))
        }
        (None, Some(_)) => {
            return Err(AmiError::MalformedAction(
                "Originate with \"Data\" requires \"Application\"".to_string(),
            ))
        }
        _ => {}
    }

    let mut fields: ActionFields = vec![
        ("Action".to_string(), "Originate".to_string()),
        (
            "Channel".to_string(),
            format!("Local/{}@{}", request.originator, request.context),
        ),
        ("Exten".to_string(), request.extension.clone()),
        ("Context".to_string(), request.context.clone()),
        ("Priority".to_string(), request.priority.to_string()),
        ("Async".to_string(), request.run_async.to_string()),
        (
            "Timeout".to_string(),
            (request.timeout_secs * 1000).to_string(),
        ),
        (
            "Callerid".to_string(),
            request
                .caller_id
                .clone()
                .unwrap_or_else(|| request.extension.clone()),
        ),
    ];

    if let (Some(application), Some(data)) = (&request.application, &request.app_data) {
        fields.push(("Application".to_string(), application.clone()));
        fields.push(("Data".to_string(), data.clone()));
    }
    if let Some(account) = &request.account {
        fields.push(("Account".to_string(), account.clone()));
    }
    if let Some(early_media) = request.early_media {
        fields.push(("EarlyMedia".to_string(), early_media.to_string()));
    }
    for (n, codec) in request.codecs.iter().enumerate() {
        fields.push((format!("Codecs[{n}]"), codec.clone()));
    }
    if let Some(other_channel_id) = &request.other_channel_id {
        fields.push(("OtherChannelId".to_string(), other_channel_id.clone()));
    }
    for (n, variable) in request.variables.iter().enumerate() {
        fields.push((format!("Variable[{n}]"), variable.clone()));
    }

    Ok(fields)
}

/// Parameters for a `Redirect` action.
#[derive(Debug, Clone)]
pub struct RedirectRequest {
    pub channel: String,
    pub extension: String,
    pub context: String,
    pub priority: u32,
    pub extra_channel: Option<String>,
    pub extra_extension: Option<String>,
    pub extra_context: Option<String>,
    pub extra_priority: Option<u32>,
}

impl Default for RedirectRequest {
    fn default() -> Self {
        Self {
            channel: String::new(),
            extension: String::new(),
            context: DEFAULT_CONTEXT.to_string(),
            priority: 1,
            extra_channel: None,
            extra_extension: None,
            extra_context: None,
            extra_priority: None,
        }
    }
}

/// Build a `Redirect` action.
pub fn redirect(request: &RedirectRequest) -> ActionFields {
    let mut fields: ActionFields = vec![
        ("Action".to_string(), "Redirect".to_string()),
        ("Channel".to_string(), request.channel.clone()),
        ("Exten".to_string(), request.extension.clone()),
        ("Context".to_string(), request.context.clone()),
        ("Priority".to_string(), request.priority.to_string()),
    ];
    if let Some(extra_channel) = &request.extra_channel {
        fields.push(("ExtraChannel".to_string(), extra_channel.clone()));
    }
    if let Some(extra_extension) = &request.extra_extension {
        fields.push(("ExtraExten".to_string(), extra_extension.clone()));
    }
    if let Some(extra_context) = &request.extra_context {
        fields.push(("ExtraContext".to_string(), extra_context.clone()));
    }
    if let Some(extra_priority) = request.extra_priority {
        fields.push(("ExtraPriority".to_string(), extra_priority.to_string()));
    }
    fields
}

/// Build a `BlindTransfer` action.
pub fn blind_transfer(channel: &str, extension: &str, context: &str) -> ActionFields {
    vec![
        ("Action".to_string(), "BlindTransfer".to_string()),
        ("Channel".to_string(), channel.to_string()),
        ("Exten".to_string(), extension.to_string()),
        ("Context".to_string(), context.to_string()),
    ]
}
