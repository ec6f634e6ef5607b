//! Object API behavior through the REST orchestrator

use std::sync::Arc;

use aerobase::auth::{Auth, Credentials};
use aerobase::config::AppConfig;
use aerobase::errors::ApiError;
use aerobase::query::{Query, QueryOptions};
use aerobase::rest::RestService;
use aerobase::store::MemoryStore;
use aerobase::triggers::{FnHook, HookError, TriggerRegistry, TriggerRequest, TriggerType};
use serde_json::{json, Map, Value};

fn config() -> AppConfig {
    AppConfig::new("app", "master", "client")
}

fn service() -> RestService {
    RestService::new(config(), Arc::new(MemoryStore::new()))
}

fn body(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}

async fn signup(rest: &RestService, username: &str) -> (String, Auth) {
    let response = rest
        .create(
            &Auth::anonymous(),
            "_User",
            body(json!({"username": username, "password": "pw"})),
            None,
        )
        .await
        .unwrap()
        .response;
    let token = response["sessionToken"].as_str().unwrap().to_string();
    let credentials = Credentials {
        app_id: Some("app".into()),
        client_key: Some("client".into()),
        session_token: Some(token),
        ..Default::default()
    };
    let auth = rest.authenticate(&credentials, false).await.unwrap();
    (response["objectId"].as_str().unwrap().to_string(), auth)
}

#[tokio::test]
async fn test_find_returns_only_readable_objects() {
    let rest = service();
    let (alice_id, alice) = signup(&rest, "alice").await;
    let (_, bob) = signup(&rest, "bob").await;

    let mut owner_only = Map::new();
    owner_only.insert(alice_id.clone(), json!({"read": true}));
    for acl in [json!({"*": {"read": true}}), Value::Object(owner_only), json!({})] {
        rest.create(&Auth::master(), "Doc", body(json!({"ACL": acl})), None)
            .await
            .unwrap();
    }

    let count = |auth: Auth| {
        let rest = rest.clone();
        async move {
            rest.find(&auth, "Doc", None, QueryOptions::default(), None)
                .await
                .unwrap()
                .results
                .len()
        }
    };
    assert_eq!(count(Auth::master()).await, 3);
    assert_eq!(count(alice).await, 2);
    assert_eq!(count(bob).await, 1);
    assert_eq!(count(Auth::anonymous()).await, 1);
}

#[tokio::test]
async fn test_create_then_get_round_trip() {
    let rest = service();
    let created = rest
        .create(
            &Auth::anonymous(),
            "GameScore",
            body(json!({"score": 1337, "playerName": "Sean", "tags": ["a", "b"]})),
            None,
        )
        .await
        .unwrap();
    assert!(created.created);
    let id = created.response["objectId"].as_str().unwrap();
    assert_eq!(
        created.location,
        format!("http://localhost:1337/classes/GameScore/{}", id)
    );

    let object = rest
        .get(&Auth::anonymous(), "GameScore", id, QueryOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(object["score"], 1337);
    assert_eq!(object["playerName"], "Sean");
    assert_eq!(object["tags"], json!(["a", "b"]));
    assert_eq!(object["createdAt"], created.response["createdAt"]);
    assert_eq!(object["updatedAt"], object["createdAt"]);
}

#[tokio::test]
async fn test_delete_twice_succeeds() {
    let rest = service();
    let id = rest
        .create(&Auth::anonymous(), "Doc", body(json!({"a": 1})), None)
        .await
        .unwrap()
        .response["objectId"]
        .as_str()
        .unwrap()
        .to_string();

    rest.delete(&Auth::anonymous(), "Doc", &id, None).await.unwrap();
    rest.delete(&Auth::anonymous(), "Doc", &id, None).await.unwrap();

    let err = rest
        .get(&Auth::anonymous(), "Doc", &id, QueryOptions::default(), None)
        .await
        .unwrap_err();
    assert_eq!(err, ApiError::not_found("Object not found."));
}

#[tokio::test]
async fn test_field_type_is_fixed_on_first_write() {
    let rest = service();
    rest.create(&Auth::anonymous(), "Score", body(json!({"points": 10})), None)
        .await
        .unwrap();

    let err = rest
        .create(&Auth::anonymous(), "Score", body(json!({"points": "ten"})), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::IncorrectType(_)));

    let found = rest
        .find(&Auth::master(), "Score", None, QueryOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(found.results.len(), 1);
}

#[tokio::test]
async fn test_before_save_veto_leaves_object_unchanged() {
    let triggers = TriggerRegistry::new().with_hook(
        TriggerType::BeforeSave,
        "Locked",
        Arc::new(FnHook(|req: &mut TriggerRequest| {
            if req.original.is_some() {
                return Err(HookError::new("this record is locked"));
            }
            Ok(())
        })),
    );
    let rest = RestService::builder(config(), Arc::new(MemoryStore::new()))
        .with_triggers(triggers)
        .build();

    let id = rest
        .create(&Auth::master(), "Locked", body(json!({"value": 1})), None)
        .await
        .unwrap()
        .response["objectId"]
        .as_str()
        .unwrap()
        .to_string();
    let before = rest
        .store()
        .find_one("Locked", &Query::by_id(&id))
        .await
        .unwrap()
        .unwrap();

    let err = rest
        .update(
            &Auth::master(),
            "Locked",
            &id,
            body(json!({"value": {"__op": "Increment", "amount": 5}, "extra": true})),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ApiError::Hook {
            code: 141,
            message: "this record is locked".into()
        }
    );

    let after = rest
        .store()
        .find_one("Locked", &Query::by_id(&id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(before, after);
    let schema = rest.schema().get("Locked").await.unwrap().unwrap();
    assert!(schema.field_type("extra").is_none());
}

#[tokio::test]
async fn test_after_save_failure_does_not_change_response() {
    let triggers = TriggerRegistry::new().with_hook(
        TriggerType::AfterSave,
        "Audit",
        Arc::new(FnHook(|_: &mut TriggerRequest| {
            Err(HookError::new("audit sink down"))
        })),
    );
    let rest = RestService::builder(config(), Arc::new(MemoryStore::new()))
        .with_triggers(triggers)
        .build();

    let created = rest
        .create(&Auth::anonymous(), "Audit", body(json!({"event": "x"})), None)
        .await
        .unwrap();
    assert!(created.created);
}
