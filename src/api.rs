use std::convert::Infallible;

use log::{error, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::error::ChatError;
use crate::messages::MessageBody;
use crate::server::Server;
use crate::store::DocId;

/// Header carrying the caller's display name.
pub const USER_HEADER: &str = "user";

const MAX_BODY_BYTES: u64 = 16 * 1024;

#[derive(Deserialize)]
struct JoinRequest {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<String>,
}

#[derive(Serialize)]
struct Created {
    id: DocId,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

pub fn routes(server: Server) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let with_server = warp::any().map(move || server.clone());
    let user = warp::header::optional::<String>(USER_HEADER);

    let join = warp::path!("participants")
        .and(warp::post())
        .and(json_body())
        .and(with_server.clone())
        .and_then(join_handler);

    let list_participants = warp::path!("participants")
        .and(warp::get())
        .and(with_server.clone())
        .and_then(list_participants_handler);

    let post_message = warp::path!("messages")
        .and(warp::post())
        .and(user.clone())
        .and(json_body())
        .and(with_server.clone())
        .and_then(post_message_handler);

    let list_messages = warp::path!("messages")
        .and(warp::get())
        .and(user.clone())
        .and(warp::query::<ListQuery>())
        .and(with_server.clone())
        .and_then(list_messages_handler);

    let heartbeat = warp::path!("status")
        .and(warp::post())
        .and(user.clone())
        .and(with_server.clone())
        .and_then(heartbeat_handler);

    let edit_message = warp::path!("messages" / String)
        .and(warp::put())
        .and(user.clone())
        .and(json_body())
        .and(with_server.clone())
        .and_then(edit_message_handler);

    let delete_message = warp::path!("messages" / String)
        .and(warp::delete())
        .and(user)
        .and(with_server)
        .and_then(delete_message_handler);

    join.or(list_participants)
        .or(post_message)
        .or(list_messages)
        .or(heartbeat)
        .or(edit_message)
        .or(delete_message)
        .recover(handle_rejection)
        // cors wraps the recovered routes so error replies carry its headers too
        .with(
            warp::cors()
                .allow_any_origin()
                .allow_methods(vec!["GET", "POST", "PUT", "DELETE"])
                .allow_headers(vec!["content-type", USER_HEADER]),
        )
        .recover(handle_rejection)
}

async fn join_handler(request: JoinRequest, server: Server) -> Result<Response, Infallible> {
    Ok(match server.join(&request.name).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => error_response(&e),
    })
}

async fn list_participants_handler(server: Server) -> Result<Response, Infallible> {
    Ok(match server.list_participants().await {
        Ok(participants) => warp::reply::json(&participants).into_response(),
        Err(e) => error_response(&e),
    })
}

async fn post_message_handler(
    user: Option<String>,
    body: MessageBody,
    server: Server,
) -> Result<Response, Infallible> {
    let result = match identity(user) {
        Ok(from) => server.post_message(&from, &body).await,
        Err(e) => Err(e),
    };
    Ok(match result {
        Ok(id) => {
            warp::reply::with_status(warp::reply::json(&Created { id }), StatusCode::CREATED)
                .into_response()
        }
        Err(e) => error_response(&e),
    })
}

async fn list_messages_handler(
    user: Option<String>,
    query: ListQuery,
    server: Server,
) -> Result<Response, Infallible> {
    let result = match identity(user) {
        Ok(viewer) => server.list_messages(&viewer, query.limit.as_deref()).await,
        Err(e) => Err(e),
    };
    Ok(match result {
        Ok(messages) => warp::reply::json(&messages).into_response(),
        Err(e) => error_response(&e),
    })
}

async fn heartbeat_handler(user: Option<String>, server: Server) -> Result<Response, Infallible> {
    let result = match identity(user) {
        Ok(name) => server.heartbeat(&name).await,
        Err(e) => Err(e),
    };
    Ok(match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(&e),
    })
}

async fn edit_message_handler(
    id: String,
    user: Option<String>,
    body: MessageBody,
    server: Server,
) -> Result<Response, Infallible> {
    let result = match identity(user) {
        Ok(editor) => server.edit_message(&id, &editor, &body).await,
        Err(e) => Err(e),
    };
    Ok(match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(&e),
    })
}

async fn delete_message_handler(
    id: String,
    user: Option<String>,
    server: Server,
) -> Result<Response, Infallible> {
    let result = match identity(user) {
        Ok(requester) => server.delete_message(&id, &requester).await,
        Err(e) => Err(e),
    };
    Ok(match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(&e),
    })
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn identity(user: Option<String>) -> Result<String, ChatError> {
    match user.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(ChatError::InvalidArgument(format!(
            "missing '{USER_HEADER}' header"
        ))),
    }
}

pub fn status_for(err: &ChatError) -> StatusCode {
    match err {
        ChatError::InvalidArgument(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ChatError::Conflict(_) => StatusCode::CONFLICT,
        ChatError::NotFound(_) => StatusCode::NOT_FOUND,
        ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
        ChatError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
        ChatError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &ChatError) -> Response {
    let message = match err {
        ChatError::Unavailable(_) => "internal error".to_string(),
        other => other.to_string(),
    };
    reply_error(status_for(err), err.kind(), message)
}

fn reply_error(status: StatusCode, error: &'static str, message: String) -> Response {
    warp::reply::with_status(warp::reply::json(&ErrorBody { error, message }), status)
        .into_response()
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let response = if err.is_not_found() {
        reply_error(StatusCode::NOT_FOUND, "not_found", "no such route".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        reply_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_argument", e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        reply_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_argument", e.to_string())
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        reply_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_argument",
            "body must be JSON".to_string(),
        )
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        reply_error(
            StatusCode::LENGTH_REQUIRED,
            "invalid_argument",
            "content-length required".to_string(),
        )
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        reply_error(StatusCode::PAYLOAD_TOO_LARGE, "invalid_argument", "body too large".to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidHeader>() {
        reply_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_argument", e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        reply_error(
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            "method not allowed".to_string(),
        )
    } else if let Some(e) = err.find::<warp::cors::CorsForbidden>() {
        warn!("cors request refused: {}", e);
        reply_error(StatusCode::FORBIDDEN, "forbidden", e.to_string())
    } else {
        error!("unhandled rejection: {:?}", err);
        reply_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal error".to_string(),
        )
    };
    Ok(response)
}
