use crate::room::RoomRegistry;
use serde_json::json;
use warp::Filter;

/// Debug HTTP endpoint exposing live room rosters. Not part of the signaling
/// protocol; intended for operators only.
pub async fn run_debug_server(registry: RoomRegistry, port: u16) {
    let rooms = warp::path!("debug" / "rooms")
        .and(warp::get())
        .and(with_registry(registry))
        .and_then(|registry: RoomRegistry| async move {
            let snapshots = registry.snapshot_all().await;
            let body: Vec<_> = snapshots
                .into_iter()
                .map(|(room_id, participants)| {
                    json!({
                        "room_id": room_id,
                        "participant_count": participants.len(),
                        "participants": participants,
                    })
                })
                .collect();
            Ok::<_, warp::Rejection>(warp::reply::json(&body))
        });

    warp::serve(rooms).run(([0, 0, 0, 0], port)).await;
}

fn with_registry(
    registry: RoomRegistry,
) -> impl Filter<Extract = (RoomRegistry,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || registry.clone())
}
