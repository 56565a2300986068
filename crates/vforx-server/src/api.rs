//! JSON handlers for the control surface.

use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast;
use vforx_core::channel::{ChannelError, ChannelRef, ParamError};
use vforx_core::protocol::{
    AddChannel, Added, ApiError, ChannelInfo, ChannelList, ChannelizerBody, ChannelizerStatus,
    Deleted, FindQuery, Found, ParamValue, SeekRequest, SpectrumQuery, SpectrumResponse,
    WaterfallResponse,
};
use vforx_core::receiver::Receiver;

pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<ChannelError> for HttpError {
    fn from(e: ChannelError) -> Self {
        let status = match &e {
            ChannelError::NoSuchChannel(_) | ChannelError::Param(ParamError::NoSuchChannel(_)) => {
                StatusCode::NOT_FOUND
            }
            ChannelError::CapacityExhausted(_)
            | ChannelError::LastChannel { .. }
            | ChannelError::Param(ParamError::Locked(_)) => StatusCode::CONFLICT,
            ChannelError::Param(_) => StatusCode::BAD_REQUEST,
            ChannelError::Engine(err) => {
                tracing::error!(error = ?err, "engine error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiError {
                error: self.message,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, HttpError>;

fn parse_target(raw: &str) -> Result<ChannelRef, HttpError> {
    raw.parse().map_err(|_| {
        HttpError::new(
            StatusCode::BAD_REQUEST,
            format!("channel must be an index or \"current\", got {raw:?}"),
        )
    })
}

fn channel_list(rx: &Receiver) -> ChannelList {
    let mgr = rx.manager();
    let center = rx.center_frequency();
    ChannelList {
        current: mgr.current(),
        capacity: mgr.capacity(),
        active: mgr.active_count(),
        channelized: mgr.is_channelized(),
        channels: mgr
            .channels()
            .map(|ch| ChannelInfo::new(ch, center, mgr.current()))
            .collect(),
    }
}

pub async fn list_channels(State(state): State<Arc<AppState>>) -> Json<ChannelList> {
    Json(channel_list(&state.receiver()))
}

pub async fn add_channel(
    State(state): State<Arc<AppState>>,
    body: Option<Json<AddChannel>>,
) -> ApiResult<Added> {
    let seed = body.and_then(|Json(b)| b.seed);
    let mut rx = state.receiver();
    let mgr = rx.manager_mut();
    let seed = seed.unwrap_or_else(|| mgr.current());
    let index = mgr.add(seed)?;
    tracing::info!(channel = index, seed, "channel added");
    Ok(Json(Added { index }))
}

pub async fn delete_channel(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> ApiResult<Deleted> {
    let mut rx = state.receiver();
    match rx.manager_mut().delete(index) {
        Ok(selected) => {
            tracing::info!(channel = index, selected, "channel deleted");
            Ok(Json(Deleted {
                selected,
                switched_off: false,
            }))
        }
        Err(ChannelError::LastChannel { selected }) => {
            tracing::info!(channel = index, "last channel switched off");
            Ok(Json(Deleted {
                selected,
                switched_off: true,
            }))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn select_channel(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> ApiResult<ChannelList> {
    let mut rx = state.receiver();
    rx.manager_mut().select(index)?;
    Ok(Json(channel_list(&rx)))
}

pub async fn get_param(
    State(state): State<Arc<AppState>>,
    Path((target, param)): Path<(String, String)>,
) -> ApiResult<ParamValue> {
    let target = parse_target(&target)?;
    let value = state.receiver().manager().get_param(target, &param)?;
    Ok(Json(ParamValue { value }))
}

pub async fn set_param(
    State(state): State<Arc<AppState>>,
    Path((target, param)): Path<(String, String)>,
    Json(body): Json<ParamValue>,
) -> ApiResult<ParamValue> {
    let target = parse_target(&target)?;
    let mut rx = state.receiver();
    let mgr = rx.manager_mut();
    mgr.set_param(target, &param, &body.value)?;
    let value = mgr.get_param(target, &param)?;
    tracing::debug!(?target, param = %param, ?value, "parameter set");
    Ok(Json(ParamValue { value }))
}

pub async fn find_channel(
    State(state): State<Arc<AppState>>,
    Query(q): Query<FindQuery>,
) -> Json<Found> {
    Json(Found {
        index: state.receiver().find_by_frequency(q.freq),
    })
}

pub async fn spectrum(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SpectrumQuery>,
) -> ApiResult<SpectrumResponse> {
    let size = q.size.unwrap_or(state.cfg.spectrum.fft_size);
    if !size.is_power_of_two() {
        return Err(HttpError::new(
            StatusCode::BAD_REQUEST,
            "size must be a power of two",
        ));
    }
    let rx = state.receiver();
    Ok(Json(SpectrumResponse {
        center_hz: rx.center_frequency(),
        sample_rate: rx.channel_rate(),
        bins: rx.snapshot_spectrum(size),
    }))
}

pub async fn update_channelizer(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChannelizerBody>,
) -> ApiResult<ChannelizerStatus> {
    let mut rx = state.receiver();
    let mgr = rx.manager_mut();
    if let Some(threads) = body.threads {
        mgr.set_channelizer(threads)?;
    }
    let channelized = mgr
        .update_channelizer(&body.update())
        .map_err(|e| match e {
            ChannelError::Engine(err) => HttpError::new(StatusCode::BAD_REQUEST, format!("{err:#}")),
            other => other.into(),
        })?;
    let ch = mgr.channelizer();
    Ok(Json(ChannelizerStatus {
        channelized,
        bands: ch.map(|c| c.bands()),
        output_rate: ch.map(|c| c.output_rate()),
    }))
}

fn no_history() -> HttpError {
    HttpError::new(StatusCode::NOT_FOUND, "no recording configured")
}

pub async fn waterfall_seek(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SeekRequest>,
) -> Result<StatusCode, HttpError> {
    let history = state.history.as_ref().ok_or_else(no_history)?;
    history.coordinator.seek(body.position_ms);
    tracing::debug!(position_ms = body.position_ms, "waterfall seek requested");
    Ok(StatusCode::ACCEPTED)
}

pub async fn waterfall_stop(State(state): State<Arc<AppState>>) -> Result<StatusCode, HttpError> {
    let history = state.history.as_ref().ok_or_else(no_history)?;
    history.coordinator.stop();
    Ok(StatusCode::ACCEPTED)
}

pub async fn waterfall(State(state): State<Arc<AppState>>) -> ApiResult<WaterfallResponse> {
    let history = state.history.as_ref().ok_or_else(no_history)?;
    Ok(Json(WaterfallResponse {
        width: history.image.width(),
        ms_per_line: state.rt.ms_per_line,
        history_start_ms: history.start_ms(),
        rows: history.image.rows(),
    }))
}

pub async fn events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(ev) => {
                    let event = match Event::default().json_data(&ev) {
                        Ok(e) => e,
                        Err(e) => {
                            tracing::error!(error = ?e, "failed to serialize redraw event");
                            continue;
                        }
                    };
                    return Some((Ok(event), rx));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "events client lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
