//! The demo status handler: `GET /` answers with application metadata.

use crate::config::app_settings;
use serde::Serialize;
use warp::Filter;
use warp::filters::BoxedFilter;

#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub server: String,
    pub name: String,
    pub version: String,
    pub build: String,
    pub timestamp: i64,
}

pub fn get_status_route() -> BoxedFilter<(impl warp::Reply,)> {
    warp::path::end()
        .and(warp::get())
        .and_then(handle_get_status)
        .boxed()
}

#[tracing::instrument(level = "debug",
    name = "GET /",
    skip_all,
    fields(http.method = "GET",
           http.url = "/",
           http.status_code = tracing::field::Empty)
)]
async fn handle_get_status() -> Result<impl warp::Reply, warp::Rejection> {
    Ok(warp::reply::json(&status_message()))
}

fn status_message() -> StatusMessage {
    let settings = app_settings();

    StatusMessage {
        server: "warp".to_owned(),
        name: settings.get_string_env("VCAP_APPLICATION", &["name"]),
        version: settings.get_string_env("VCAP_APPLICATION", &["version"]),
        build: settings.get_string_env("build", &[]),
        timestamp: current_timestamp(),
    }
}

/// Milliseconds since the UNIX epoch.
pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::http::StatusCode;

    #[tokio::test]
    async fn status_route_answers_on_root() {
        let response = warp::test::request()
            .path("/")
            .reply(&get_status_route())
            .await;

        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["server"], "warp");
        assert!(body["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn status_route_rejects_other_paths() {
        let response = warp::test::request()
            .path("/somewhere-else")
            .reply(&get_status_route())
            .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn current_timestamp_is_in_milliseconds() {
        let now = current_timestamp();
        // Somewhere between 2020 and 2120, in millis.
        assert!(now > 1_577_836_800_000);
        assert!(now < 4_733_510_400_000);
    }
}
