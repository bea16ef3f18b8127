use serde::Serialize;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Request {
    system: SystemRequest,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum SystemRequest {
    GetSysinfo(Empty),
    SetRelayState(RelayState),
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
struct Empty {}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
struct RelayState {
    state: u8,
}

impl Request {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

pub fn make_sysinfo_message() -> Request {
    Request {
        system: SystemRequest::GetSysinfo(Empty {}),
    }
}

pub fn make_relay_message(on: bool) -> Request {
    Request {
        system: SystemRequest::SetRelayState(RelayState { state: on as u8 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysinfo_message() {
        let json = String::from_utf8(make_sysinfo_message().to_bytes().unwrap()).unwrap();
        assert_eq!(json, r#"{"system":{"get_sysinfo":{}}}"#);
    }

    #[test]
    fn test_relay_messages() {
        let on = String::from_utf8(make_relay_message(true).to_bytes().unwrap()).unwrap();
        let off = String::from_utf8(make_relay_message(false).to_bytes().unwrap()).unwrap();
        assert_eq!(on, r#"{"system":{"set_relay_state":{"state":1}}}"#);
        assert_eq!(off, r#"{"system":{"set_relay_state":{"state":0}}}"#);
    }
}
