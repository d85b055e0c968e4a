//! End-to-end tests for the provider and the operation builder, run against
//! a real router and a scripted wallet over in-process transports.

use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use walletmesh_client::{MethodSerializer, ProviderOptions, WalletProvider};
use walletmesh_router::error::codes;
use walletmesh_router::transport::local::{LocalTransport, LocalTransportOptions};
use walletmesh_router::{
    AllowAllPermissions, ChainPermissions, MemorySessionStore, Message, MethodCall, Router,
    RouterConfig, RouterError, RpcErrorPayload, RpcResponse, Transport,
};

const APP_ORIGIN: &str = "https://dapp.example";
const CHAIN: &str = "x:1";

/// A wallet that echoes, fails on demand, and speaks a toy serialized
/// protocol on `blob`: it returns whatever params it received wrapped in a
/// serialized envelope.
fn spawn_wallet() -> Arc<dyn Transport> {
    let (router_side, wallet_side) = LocalTransport::pair();
    let wallet_side = Arc::new(wallet_side);
    let reply_side = wallet_side.clone();
    wallet_side.on_message(Arc::new(move |message| {
        let reply_side = reply_side.clone();
        async move {
            let Message::Request(request) = message else {
                return Ok(());
            };
            let response = match request.method.as_str() {
                "echo" => RpcResponse::result(request.id, request.params.unwrap_or(Value::Null)),
                "blob" => RpcResponse::result(
                    request.id,
                    json!({
                        "method": "blob",
                        "serialized": request.params.unwrap_or(Value::Null),
                    }),
                ),
                "hang" => return Ok(()),
            "fail" => RpcResponse::error(
                    request.id,
                    RpcErrorPayload {
                        code: -32000,
                        message: "scripted wallet failure".into(),
                        data: None,
                    },
                ),
                other => RpcResponse::error(
                    request.id,
                    RpcErrorPayload {
                        code: -32601,
                        message: format!("Unknown wallet method '{other}'"),
                        data: None,
                    },
                ),
            };
            reply_side.send(Message::Response(response)).await
        }
        .boxed()
    }));
    Arc::new(router_side)
}

fn requested_permissions() -> ChainPermissions {
    let mut permissions = BTreeMap::new();
    permissions.insert(
        CHAIN.into(),
        vec![
            "echo".into(),
            "fail".into(),
            "blob".into(),
            "hang".into(),
        ],
    );
    permissions
}

static LOGGING: std::sync::Once = std::sync::Once::new();

fn harness() -> (Router, WalletProvider) {
    LOGGING.call_once(|| {
        let _ = walletmesh_logger::init(&walletmesh_logger::LogConfig::default());
    });
    let router = Router::new(
        Arc::new(MemorySessionStore::new()),
        Arc::new(AllowAllPermissions::new()),
        RouterConfig::default(),
    );
    router.add_wallet(CHAIN.into(), spawn_wallet()).unwrap();

    let (app_side, router_side) = LocalTransport::pair_with(
        LocalTransportOptions::default(),
        LocalTransportOptions {
            origin: Some(APP_ORIGIN.into()),
            ..Default::default()
        },
    );
    router.serve(Arc::new(router_side));

    let provider = WalletProvider::new(Arc::new(app_side), ProviderOptions::default());
    (router, provider)
}

fn router_code(err: &walletmesh_client::ProviderError) -> i64 {
    err.as_router().expect("expected a router error").code()
}

#[tokio::test]
async fn connect_then_call_round_trips() {
    let (_router, provider) = harness();

    let connected = provider.connect(&requested_permissions()).await.unwrap();
    assert_eq!(connected.session_id.len(), 32);
    assert_eq!(provider.session_id(), Some(connected.session_id));

    let result = provider
        .call(&CHAIN.into(), MethodCall::new("echo", Some(json!(["hi"]))), None)
        .await
        .unwrap();
    assert_eq!(result, json!(["hi"]));
}

#[tokio::test]
async fn session_requiring_calls_are_rejected_locally_when_disconnected() {
    let (_router, provider) = harness();

    let err = provider
        .call(&CHAIN.into(), MethodCall::new("echo", None), None)
        .await
        .unwrap_err();
    assert_eq!(router_code(&err), codes::INVALID_SESSION);

    let err = provider
        .update_permissions(&requested_permissions())
        .await
        .unwrap_err();
    assert_eq!(router_code(&err), codes::INVALID_SESSION);
}

#[tokio::test]
async fn get_permissions_without_a_session_is_an_empty_map() {
    let (_router, provider) = harness();
    assert_eq!(provider.get_permissions(None).await.unwrap(), json!({}));
}

#[tokio::test]
async fn disconnect_clears_the_local_session() {
    let (_router, provider) = harness();
    provider.connect(&requested_permissions()).await.unwrap();

    provider.disconnect().await.unwrap();
    assert_eq!(provider.session_id(), None);
}

#[tokio::test]
async fn reconnect_restores_and_soft_fails() {
    let (_router, provider) = harness();
    let connected = provider.connect(&requested_permissions()).await.unwrap();
    let session_id = connected.session_id.clone();

    provider.disconnect().await.unwrap();
    // Disconnect deleted the session server-side too, so restoring it is a
    // soft failure that leaves local state alone.
    let restored = provider.reconnect(&session_id).await.unwrap();
    assert!(!restored.restored);
    assert_eq!(provider.session_id(), None);

    let connected = provider.connect(&requested_permissions()).await.unwrap();
    let restored = provider.reconnect(&connected.session_id).await.unwrap();
    assert!(restored.restored);
    assert_eq!(provider.session_id(), Some(connected.session_id));
}

#[tokio::test]
async fn bulk_call_surfaces_partial_failures() {
    let (_router, provider) = harness();
    provider.connect(&requested_permissions()).await.unwrap();

    let err = provider
        .bulk_call(
            &CHAIN.into(),
            vec![
                MethodCall::new("echo", Some(json!("a"))),
                MethodCall::new("fail", None),
            ],
            None,
        )
        .await
        .unwrap_err();

    match err.as_router() {
        Some(RouterError::PartialFailure {
            partial_responses,
            error,
        }) => {
            assert_eq!(partial_responses, &vec![json!("a")]);
            assert_eq!(error.code, codes::WALLET_ERROR);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn per_call_timeout_bounds_an_unresponsive_wallet() {
    let (_router, provider) = harness();
    provider.connect(&requested_permissions()).await.unwrap();

    let err = provider
        .call(
            &CHAIN.into(),
            MethodCall::new("hang", None),
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert_eq!(router_code(&err), codes::WALLET_NOT_AVAILABLE);

    // The builder forwards the same bound.
    let err = provider
        .ops(CHAIN.into())
        .call::<Value>("hang", None)
        .execute(Some(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert_eq!(router_code(&err), codes::WALLET_NOT_AVAILABLE);
}

#[tokio::test]
async fn serializers_wrap_call_params_and_unwrap_envelopes() {
    let (_router, provider) = harness();
    provider.connect(&requested_permissions()).await.unwrap();

    provider.serializers().register(
        "blob",
        MethodSerializer::new(
            Some(Arc::new(|params| {
                Ok(json!(params.as_str().unwrap_or_default().to_uppercase()))
            })),
            Some(Arc::new(|payload| {
                Ok(json!(payload.as_str().unwrap_or_default().to_lowercase()))
            })),
        ),
    );

    // Params go out uppercased; the wallet echoes them inside an envelope;
    // the result transform lowercases them back.
    let result = provider
        .call(&CHAIN.into(), MethodCall::new("blob", Some(json!("hi"))), None)
        .await
        .unwrap();
    assert_eq!(result, json!("hi"));

    // A method without a serializer is untouched even when the wallet
    // answers with an envelope-shaped object.
    let envelope = json!({ "method": "echo", "serialized": "raw" });
    let result = provider
        .call(&CHAIN.into(), MethodCall::new("echo", Some(envelope.clone())), None)
        .await
        .unwrap();
    assert_eq!(result, envelope);
}

#[tokio::test]
async fn ops_with_one_call_returns_a_bare_value() {
    let (_router, provider) = harness();
    provider.connect(&requested_permissions()).await.unwrap();

    let result: Vec<String> = provider
        .ops(CHAIN.into())
        .call::<Vec<String>>("echo", Some(json!(["solo"])))
        .execute(None)
        .await
        .unwrap();
    assert_eq!(result, vec!["solo".to_string()]);
}

#[tokio::test]
async fn ops_with_many_calls_returns_an_ordered_tuple() {
    let (_router, provider) = harness();
    provider.connect(&requested_permissions()).await.unwrap();

    let (first, second, third): (u64, String, Value) = provider
        .ops(CHAIN.into())
        .call::<u64>("echo", Some(json!(1)))
        .call::<String>("echo", Some(json!("two")))
        .call::<Value>("echo", Some(json!({ "n": 3 })))
        .execute(None)
        .await
        .unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, "two");
    assert_eq!(third, json!({ "n": 3 }));
}

#[tokio::test]
async fn ops_with_no_calls_is_rejected() {
    let (_router, provider) = harness();
    provider.connect(&requested_permissions()).await.unwrap();

    let err = provider.ops(CHAIN.into()).execute(None).await.unwrap_err();
    assert_eq!(router_code(&err), codes::INVALID_REQUEST);
}

#[tokio::test]
async fn cloned_builders_extend_independently() {
    let (_router, provider) = harness();
    provider.connect(&requested_permissions()).await.unwrap();

    let base = provider
        .ops(CHAIN.into())
        .call::<String>("echo", Some(json!("shared")));
    let left = base.clone().call::<String>("echo", Some(json!("left")));
    let right = base.call::<String>("echo", Some(json!("right")));

    let (a, b): (String, String) = left.execute(None).await.unwrap();
    assert_eq!((a.as_str(), b.as_str()), ("shared", "left"));
    let (a, b): (String, String) = right.execute(None).await.unwrap();
    assert_eq!((a.as_str(), b.as_str()), ("shared", "right"));
}
