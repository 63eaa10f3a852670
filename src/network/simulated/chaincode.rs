//! Reference key/value chaincode run by the simulated network
//!
//! Accounts map string keys to integer balances stored as decimal byte
//! strings. `invoke` dispatches on its first argument; any other function
//! name is treated as the subcommand itself.

use std::collections::BTreeMap;

use crate::types::{LifecycleError, Result};

/// Event emitted by `move` when the caller does not name one.
pub const DEFAULT_TRANSFER_EVENT: &str = "mashTransfer";

/// Payload attached to transfer events.
pub const TRANSFER_EVENT_PAYLOAD: &[u8] = b"Test Payload";

const STATUS_ERROR: i32 = 500;

pub type WorldState = BTreeMap<String, Vec<u8>>;

/// What a successful invocation produced.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub payload: Vec<u8>,
    pub event: Option<(String, Vec<u8>)>,
}

/// Run the init handler: `init A Aval B Bval`.
pub fn init(state: &mut WorldState, args: &[Vec<u8>]) -> Result<()> {
    let params = strip_function(args, "init");
    if params.len() != 4 {
        return Err(chaincode_error(format!(
            "incorrect number of init arguments: expected 4, got {}",
            params.len()
        )));
    }
    for pair in params.chunks(2) {
        let key = text(&pair[0])?;
        let value = parse_amount(&pair[1], &key)?;
        state.insert(key, value.to_string().into_bytes());
    }
    Ok(())
}

/// Run an invocation against `state`. Writes land in `state`; callers that
/// must not mutate the ledger pass a copy.
pub fn invoke(state: &mut WorldState, function: &str, args: &[Vec<u8>]) -> Result<Invocation> {
    let (command, params) = if function == "invoke" {
        match args.split_first() {
            Some((command, params)) => (text(command)?, params),
            None => return Err(chaincode_error("invoke requires a subcommand".to_string())),
        }
    } else {
        (function.to_string(), args)
    };

    match command.as_str() {
        "query" => query(state, params),
        "move" => transfer(state, params),
        "delete" => delete(state, params),
        other => Err(chaincode_error(format!(
            "unknown function '{other}', expected query, move or delete"
        ))),
    }
}

fn query(state: &WorldState, params: &[Vec<u8>]) -> Result<Invocation> {
    let [key] = params else {
        return Err(chaincode_error(
            "query expects exactly one account".to_string(),
        ));
    };
    let key = text(key)?;
    let value = state
        .get(&key)
        .ok_or_else(|| chaincode_error(format!("Nil amount for {key}")))?;
    Ok(Invocation {
        payload: value.clone(),
        event: None,
    })
}

fn transfer(state: &mut WorldState, params: &[Vec<u8>]) -> Result<Invocation> {
    if params.len() != 3 && params.len() != 4 {
        return Err(chaincode_error(format!(
            "move expects 3 or 4 arguments, got {}",
            params.len()
        )));
    }
    let from = text(&params[0])?;
    let to = text(&params[1])?;
    let amount = parse_amount(&params[2], "transfer amount")?;

    let from_balance = balance(state, &from)?;
    let to_balance = balance(state, &to)?;
    let from_after = from_balance
        .checked_sub(amount)
        .ok_or_else(|| chaincode_error(format!("balance of {from} out of range after transfer")))?;
    let to_after = to_balance
        .checked_add(amount)
        .ok_or_else(|| chaincode_error(format!("balance of {to} out of range after transfer")))?;
    state.insert(from, from_after.to_string().into_bytes());
    state.insert(to, to_after.to_string().into_bytes());

    let event_name = match params.get(3) {
        Some(name) => text(name)?,
        None => DEFAULT_TRANSFER_EVENT.to_string(),
    };
    Ok(Invocation {
        payload: Vec::new(),
        event: Some((event_name, TRANSFER_EVENT_PAYLOAD.to_vec())),
    })
}

fn delete(state: &mut WorldState, params: &[Vec<u8>]) -> Result<Invocation> {
    let [key] = params else {
        return Err(chaincode_error(
            "delete expects exactly one account".to_string(),
        ));
    };
    state.remove(&text(key)?);
    Ok(Invocation::default())
}

fn balance(state: &WorldState, key: &str) -> Result<i64> {
    let raw = state
        .get(key)
        .ok_or_else(|| chaincode_error(format!("Nil amount for {key}")))?;
    parse_amount(raw, key)
}

fn strip_function<'a>(args: &'a [Vec<u8>], name: &str) -> &'a [Vec<u8>] {
    match args.split_first() {
        Some((first, rest)) if first.as_slice() == name.as_bytes() => rest,
        _ => args,
    }
}

fn text(raw: &[u8]) -> Result<String> {
    String::from_utf8(raw.to_vec())
        .map_err(|_| chaincode_error("argument is not valid UTF-8".to_string()))
}

fn parse_amount(raw: &[u8], what: &str) -> Result<i64> {
    let value = text(raw)?;
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| chaincode_error(format!("expecting integer value for {what}, got '{value}'")))
}

fn chaincode_error(message: String) -> LifecycleError {
    LifecycleError::Chaincode {
        status: STATUS_ERROR,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::byte_args;

    fn seeded() -> WorldState {
        let mut state = WorldState::new();
        init(&mut state, &byte_args(&["init", "a", "100", "b", "200"])).unwrap();
        state
    }

    #[test]
    fn test_move_transfers_and_emits_event() {
        let mut state = seeded();
        let out = invoke(&mut state, "invoke", &byte_args(&["move", "a", "b", "1"])).unwrap();

        assert_eq!(state["a"], b"99");
        assert_eq!(state["b"], b"201");
        let (name, payload) = out.event.unwrap();
        assert_eq!(name, DEFAULT_TRANSFER_EVENT);
        assert_eq!(payload, TRANSFER_EVENT_PAYLOAD);
    }

    #[test]
    fn test_overflowing_move_is_rejected_without_writes() {
        let max = i64::MAX.to_string();
        let min = i64::MIN.to_string();
        let mut state = WorldState::new();
        init(&mut state, &byte_args(&["init", "a", "100", "b", max.as_str()])).unwrap();

        let result = invoke(&mut state, "invoke", &byte_args(&["move", "a", "b", "1"]));

        assert!(matches!(
            result,
            Err(LifecycleError::Chaincode { status: 500, .. })
        ));
        assert_eq!(state["a"], b"100");
        assert_eq!(state["b"], max.as_bytes());

        let result = invoke(&mut state, "invoke", &byte_args(&["move", "a", "b", min.as_str()]));
        assert!(matches!(result, Err(LifecycleError::Chaincode { .. })));
    }

    #[test]
    fn test_named_event_and_direct_function() {
        let mut state = seeded();
        let out = invoke(&mut state, "move", &byte_args(&["b", "a", "5", "mashRefund"])).unwrap();
        assert_eq!(out.event.unwrap().0, "mashRefund");
        assert_eq!(state["a"], b"105");
    }

    #[test]
    fn test_query_missing_account_is_chaincode_error() {
        let mut state = seeded();
        assert_eq!(
            invoke(&mut state, "invoke", &byte_args(&["query", "b"])).unwrap().payload,
            b"200"
        );

        invoke(&mut state, "invoke", &byte_args(&["delete", "b"])).unwrap();
        let result = invoke(&mut state, "invoke", &byte_args(&["query", "b"]));
        assert!(matches!(result, Err(LifecycleError::Chaincode { .. })));
    }

    #[test]
    fn test_init_rejects_bad_arguments() {
        let mut state = WorldState::new();
        assert!(init(&mut state, &byte_args(&["init", "a", "100"])).is_err());
        assert!(init(&mut state, &byte_args(&["init", "a", "x", "b", "1"])).is_err());
    }
}
