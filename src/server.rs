use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_REQUEST_LINE_LEN;
use crate::model::{BookingRequest, ModifyRequest};
use crate::observability::{REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use crate::protocol::{self, Command, Response};

/// Serve one client: read a JSON request per line, answer with one JSON
/// response per line, until the peer hangs up.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> std::io::Result<()> {
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_REQUEST_LINE_LEN));

    while let Some(next) = lines.next().await {
        let line = match next {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!("request line over {MAX_REQUEST_LINE_LEN} bytes, closing");
                let _ = lines.send(Response::error("request line too long").to_line()).await;
                break;
            }
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match protocol::parse(&line) {
            Ok(cmd) => {
                let op = cmd.label();
                let started = Instant::now();
                let response = execute(&engine, cmd).await;
                let status = if response.is_error() { "error" } else { "ok" };
                metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
                metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op)
                    .record(started.elapsed().as_secs_f64());
                response
            }
            Err(msg) => {
                debug!("{msg}");
                metrics::counter!(REQUESTS_TOTAL, "op" => "unknown", "status" => "error")
                    .increment(1);
                Response::error(msg)
            }
        };

        lines.send(response.to_line()).await.map_err(|e| match e {
            LinesCodecError::Io(e) => e,
            other => std::io::Error::other(other.to_string()),
        })?;
    }
    Ok(())
}

fn engine_err(e: EngineError) -> Response {
    Response::error(e.to_string())
}

/// Dispatch one request against the engine.
pub async fn execute(engine: &Engine, cmd: Command) -> Response {
    match cmd {
        Command::CheckAvailability { date, slot } => Response::Availability {
            availability: engine.check_availability(date, slot).await,
        },
        Command::AvailableFloors { date, slot, pax } => Response::Floors {
            floors: engine.get_available_floors(date, slot, pax).await,
        },
        Command::Book {
            pax,
            date,
            slot,
            floor_preference,
            allow_split,
            guest,
        } => {
            let request = BookingRequest {
                pax,
                date,
                slot,
                floor_preference,
                allow_split,
            };
            Response::Booking {
                outcome: engine.book_for(&request, guest).await,
            }
        }
        Command::Cancel { reservation_id } => Response::Cancel {
            outcome: engine.cancel(reservation_id).await,
        },
        Command::Modify {
            reservation_id,
            pax,
            date,
            slot,
            floor_preference,
            allow_split,
        } => {
            let changes = ModifyRequest {
                pax,
                date,
                slot,
                floor_preference,
                allow_split,
            };
            Response::Booking {
                outcome: engine.modify(reservation_id, &changes).await,
            }
        }
        Command::GetReservation { reservation_id } => Response::Reservation {
            reservation: engine.get_reservation(reservation_id).await,
        },
        Command::GuestReservations {
            guest_id,
            include_past,
        } => Response::Reservations {
            reservations: engine.reservations_for_guest(&guest_id, include_past).await,
        },
        Command::ListReservations { include_past } => Response::Reservations {
            reservations: engine.list_reservations(include_past).await,
        },
        Command::SeatingMap { date, slot } => Response::SeatingMap {
            tables: engine.seating_map(date, slot).await,
        },
        Command::AddClosure { date, reason } => match engine.add_closure(date, reason).await {
            Ok(()) => Response::Ok,
            Err(e) => engine_err(e),
        },
        Command::RemoveClosure { date } => match engine.remove_closure(date).await {
            Ok(()) => Response::Ok,
            Err(e) => engine_err(e),
        },
        Command::ListClosures => Response::Closures {
            closures: engine.list_closures().await,
        },
        Command::PurgeBefore { date } => match engine.purge_before(date).await {
            Ok(reservations) => Response::Purged { reservations },
            Err(e) => engine_err(e),
        },
    }
}
