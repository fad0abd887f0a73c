use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use tokio::sync::mpsc;

use memory_core::GameState;
use memory_core::protocol::{ClientMessage, ServerMessage};
use memory_core::reconcile::{FlipOutcome, apply_flip, reconcile};

use crate::state::*;

/// Top-level WebSocket handler -- spawned per connection.
pub async fn handle_socket(state: Arc<AppState>, mut socket: WebSocket, conn_id: ConnectionId) {
    state.connection_count.fetch_add(1, Ordering::Relaxed);

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Register connection handle.
    state.connections.insert(
        conn_id,
        ConnectionHandle {
            conn_id,
            tx: tx.clone(),
            room_id: None,
            message_count: 0,
            rate_limit_window: Instant::now(),
        },
    );

    tracing::info!(conn_id, "client connected");

    loop {
        tokio::select! {
            // Outbound: forward queued ServerMessage to the WebSocket.
            Some(msg) = rx.recv() => {
                if let Ok(json) = serde_json::to_string(&msg) {
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }
            // Inbound: read from the WebSocket.
            maybe_msg = socket.recv() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        // Rate limiting: max 20 messages per second.
                        {
                            let mut conn = match state.connections.get_mut(&conn_id) {
                                Some(c) => c,
                                None => break,
                            };
                            let now = Instant::now();
                            if now.duration_since(conn.rate_limit_window) > Duration::from_secs(1) {
                                conn.rate_limit_window = now;
                                conn.message_count = 0;
                            }
                            conn.message_count += 1;
                            if conn.message_count > 20 {
                                let _ = conn.tx.send(ServerMessage::Error {
                                    message: "Rate limited".into(),
                                });
                                continue;
                            }
                        }

                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(e) => {
                                let _ = tx.send(ServerMessage::Error {
                                    message: format!("Invalid message: {}", e),
                                });
                                continue;
                            }
                        };

                        handle_message(&state, conn_id, &tx, client_msg);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    _ => continue,
                }
            }
        }
    }

    handle_disconnect(&state, conn_id);
}

/// Lifecycle Monitor, disconnect path: vacate the waiting slot, close every
/// session this connection was seated in, notify the remaining seat.
fn handle_disconnect(state: &AppState, conn_id: ConnectionId) {
    tracing::info!(conn_id, "client disconnected");

    // The handle goes first: pairing re-checks liveness after inserting a
    // session, so a session inserted while our handle still existed is
    // guaranteed to be visible to the sweep below.
    state.connections.remove(&conn_id);

    {
        let mut slot = state.waiting.lock().unwrap();
        if *slot == Some(conn_id) {
            *slot = None;
        }
    }

    let affected: Vec<String> = state
        .sessions
        .iter()
        .filter(|entry| entry.value().seat_of(conn_id).is_some())
        .map(|entry| entry.key().clone())
        .collect();

    for room_id in affected {
        // A seat may have filled since the scan; the removed session holds
        // the authoritative roster.
        if let Some((_, session)) = state.sessions.remove(&room_id) {
            for other in session.players.into_iter().filter(|&p| p != conn_id) {
                unseat(state, other);
                send_to(state, other, ServerMessage::OpponentDisconnected);
            }
            tracing::info!(%room_id, conn_id, "session closed on disconnect");
        }
    }

    state.connection_count.fetch_sub(1, Ordering::Relaxed);
}

/// Dispatch a single client message. Handlers run to completion; every
/// session mutation happens under the registry's entry guard and broadcasts
/// fan out only after the guard is dropped.
fn handle_message(
    state: &Arc<AppState>,
    conn_id: ConnectionId,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::CreateRoom => {
            if is_engaged(state, conn_id) {
                let _ = tx.send(ServerMessage::RoomJoinError {
                    message: "Already in a game".into(),
                });
                return;
            }

            let room_id = generate_session_id();
            state
                .sessions
                .insert(room_id.clone(), Session::new(room_id.clone(), conn_id));
            seat(state, conn_id, &room_id);

            tracing::info!(%room_id, conn_id, "room created");
            let _ = tx.send(ServerMessage::RoomCreated { room_id });
        }

        ClientMessage::JoinRoom { room_id } => {
            if is_engaged(state, conn_id) {
                let _ = tx.send(ServerMessage::RoomJoinError {
                    message: "Already in a game".into(),
                });
                return;
            }

            let started = {
                let mut session = match state.sessions.get_mut(&room_id) {
                    Some(s) => s,
                    None => {
                        let _ = tx.send(ServerMessage::RoomJoinError {
                            message: "Room not found".into(),
                        });
                        return;
                    }
                };

                if session.players.len() >= 2 || session.phase != SessionPhase::Waiting {
                    let _ = tx.send(ServerMessage::RoomJoinError {
                        message: "Room full".into(),
                    });
                    return;
                }

                session.players.push(conn_id);
                session.touch();
                // Seating under the entry guard keeps the roster and the
                // connection's room association in step with each other; a
                // concurrent disconnect sweep sees both or neither.
                seat(state, conn_id, &room_id);

                if session.players.len() == 2 {
                    let game = GameState::new();
                    session.game = Some(game.clone());
                    session.phase = SessionPhase::Playing;
                    Some((session.players[0], session.players[1], game))
                } else {
                    None
                }
            };

            match started {
                Some((p1, p2, game)) => {
                    tracing::info!(%room_id, p1, p2, "game started");
                    start_game(state, &room_id, p1, p2, game);
                }
                None => {
                    let _ = tx.send(ServerMessage::WaitingForOpponent { room_id });
                }
            }
        }

        ClientMessage::JoinGame => {
            if state
                .connections
                .get(&conn_id)
                .is_some_and(|c| c.room_id.is_some())
            {
                let _ = tx.send(ServerMessage::Error {
                    message: "Already in a game".into(),
                });
                return;
            }

            // Single-slot FIFO queue: the longest-waiting connection pairs
            // first. A slot holder that has since disconnected is replaced,
            // never paired.
            let opponent = {
                let mut slot = state.waiting.lock().unwrap();
                match *slot {
                    Some(other) if other == conn_id => return,
                    Some(other) if state.connections.contains_key(&other) => {
                        *slot = None;
                        Some(other)
                    }
                    _ => {
                        *slot = Some(conn_id);
                        None
                    }
                }
            };

            let Some(waiting) = opponent else {
                let _ = tx.send(ServerMessage::Waiting);
                return;
            };

            let room_id = generate_session_id();
            let game = GameState::new();
            let mut session = Session::new(room_id.clone(), waiting);
            session.players.push(conn_id);
            session.game = Some(game.clone());
            session.phase = SessionPhase::Playing;
            state.sessions.insert(room_id.clone(), session);

            seat(state, waiting, &room_id);
            seat(state, conn_id, &room_id);

            tracing::info!(%room_id, p1 = waiting, p2 = conn_id, "auto-match paired");
            start_game(state, &room_id, waiting, conn_id, game);

            // The waiter's transport can drop between the slot pop and the
            // session insert, in which case its disconnect sweep ran before
            // the session existed and will never close it.
            close_if_vacated(state, &room_id);
        }

        ClientMessage::FlipCard { room_id, index } => {
            let update = {
                let mut session = match state.sessions.get_mut(&room_id) {
                    Some(s) => s,
                    None => {
                        tracing::debug!(%room_id, conn_id, "flip for unknown session");
                        return;
                    }
                };

                let seat = match session.seat_of(conn_id) {
                    Some(s) => s,
                    None => {
                        tracing::debug!(%room_id, conn_id, "flip from non-member");
                        return;
                    }
                };

                if session.phase != SessionPhase::Playing {
                    tracing::debug!(%room_id, conn_id, "flip outside a running game");
                    return;
                }
                let Some(game) = session.game.as_mut() else {
                    tracing::debug!(%room_id, conn_id, "flip before game start");
                    return;
                };

                match apply_flip(game, seat, index) {
                    Ok(outcome) => {
                        let snapshot = game.clone();
                        if matches!(outcome, FlipOutcome::Matched { finished: true }) {
                            session.phase = SessionPhase::Ended;
                        }
                        session.touch();
                        Some((session.players.clone(), snapshot, session.phase))
                    }
                    Err(err) => {
                        tracing::debug!(%room_id, conn_id, %err, "flip rejected");
                        None
                    }
                }
            };

            if let Some((players, snapshot, phase)) = update {
                let winner = snapshot.winner();
                broadcast(state, &players, &ServerMessage::CardFlipped { index });
                broadcast(state, &players, &ServerMessage::GameState(snapshot));
                if phase == SessionPhase::Ended {
                    tracing::info!(%room_id, ?winner, "game finished");
                    broadcast(state, &players, &ServerMessage::GameEnded { winner });
                }
            }
        }

        ClientMessage::UpdateGameState {
            room_id,
            numbers,
            flipped,
            score_player1,
            score_player2,
            current_player,
            steps,
        } => {
            let submitted = GameState {
                numbers,
                flipped,
                score_player1,
                score_player2,
                current_player,
                steps,
                pending: None,
            };

            let update = {
                let mut session = match state.sessions.get_mut(&room_id) {
                    Some(s) => s,
                    None => {
                        tracing::debug!(%room_id, conn_id, "state for unknown session");
                        return;
                    }
                };

                if session.seat_of(conn_id).is_none() {
                    tracing::debug!(%room_id, conn_id, "state from non-member");
                    return;
                }
                let Some(prev) = session.game.as_ref() else {
                    tracing::debug!(%room_id, conn_id, "state before game start");
                    return;
                };

                match reconcile(prev, submitted) {
                    Ok(next) => {
                        session.game = Some(next.clone());
                        session.touch();
                        Some((session.players.clone(), next))
                    }
                    Err(err) => {
                        tracing::warn!(%room_id, conn_id, %err, "state submission rejected");
                        None
                    }
                }
            };

            if let Some((players, next)) = update {
                broadcast(state, &players, &ServerMessage::GameState(next));
            }
        }

        ClientMessage::PlayerWantsRestart { room_id } => {
            let action = {
                let mut session = match state.sessions.get_mut(&room_id) {
                    Some(s) => s,
                    None => return,
                };

                if session.seat_of(conn_id).is_none()
                    || session.players.len() < 2
                    || session.game.is_none()
                {
                    tracing::debug!(%room_id, conn_id, "restart vote without a running game");
                    return;
                }

                session.restart_votes.insert(conn_id);
                let unanimous = session
                    .players
                    .iter()
                    .all(|p| session.restart_votes.contains(p));

                if unanimous {
                    session.restart_votes.clear();
                    let game = GameState::new();
                    session.game = Some(game.clone());
                    session.phase = SessionPhase::Playing;
                    session.touch();
                    RestartAction::Restarted(session.players.clone(), game)
                } else {
                    RestartAction::Notify(session.opponent_of(conn_id))
                }
            };

            match action {
                RestartAction::Restarted(players, game) => {
                    tracing::info!(%room_id, "game restarted by mutual consent");
                    broadcast(
                        state,
                        &players,
                        &ServerMessage::GameRestarted {
                            game_state: game,
                            starting_player: 1,
                        },
                    );
                }
                RestartAction::Notify(Some(other)) => {
                    send_to(state, other, ServerMessage::OpponentWantsRestart);
                }
                RestartAction::Notify(None) => {}
            }
        }

        ClientMessage::GameEnded { room_id, winner } => {
            if !matches!(winner, 1 | 2) {
                tracing::debug!(%room_id, conn_id, winner, "game end with bad winner");
                return;
            }

            let players = {
                let mut session = match state.sessions.get_mut(&room_id) {
                    Some(s) => s,
                    None => return,
                };
                if session.seat_of(conn_id).is_none() {
                    return;
                }
                session.phase = SessionPhase::Ended;
                session.touch();
                session.players.clone()
            };

            tracing::info!(%room_id, winner, "game end announced");
            broadcast(
                state,
                &players,
                &ServerMessage::GameEnded {
                    winner: Some(winner),
                },
            );
        }

        ClientMessage::PlayerQuit { room_id } => {
            let removed = state
                .sessions
                .remove_if(&room_id, |_, s| s.seat_of(conn_id).is_some());

            let Some((_, session)) = removed else {
                tracing::debug!(%room_id, conn_id, "quit for unknown session");
                return;
            };

            tracing::info!(%room_id, conn_id, "player quit, session closed");
            for player in session.players {
                unseat(state, player);
                if player != conn_id {
                    send_to(state, player, ServerMessage::OpponentQuit);
                }
            }
        }

        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong);
        }
    }
}

// -- Helpers ------------------------------------------------------------------

enum RestartAction {
    Restarted(Vec<ConnectionId>, GameState),
    Notify(Option<ConnectionId>),
}

/// Seated in a session or parked in the waiting slot: a connection may hold
/// at most one of those places at a time.
fn is_engaged(state: &AppState, conn_id: ConnectionId) -> bool {
    if state
        .connections
        .get(&conn_id)
        .is_some_and(|c| c.room_id.is_some())
    {
        return true;
    }
    *state.waiting.lock().unwrap() == Some(conn_id)
}

fn seat(state: &AppState, conn_id: ConnectionId, room_id: &str) {
    if let Some(mut conn) = state.connections.get_mut(&conn_id) {
        conn.room_id = Some(room_id.to_string());
    }
}

fn unseat(state: &AppState, conn_id: ConnectionId) {
    if let Some(mut conn) = state.connections.get_mut(&conn_id) {
        conn.room_id = None;
    }
}

fn send_to(state: &AppState, conn_id: ConnectionId, msg: ServerMessage) {
    if let Some(conn) = state.connections.get(&conn_id) {
        let _ = conn.tx.send(msg);
    }
}

/// Fan a message out to every seat of a session. Callers must have dropped
/// the session's entry guard first so observers never see a half-applied
/// transition.
fn broadcast(state: &AppState, players: &[ConnectionId], msg: &ServerMessage) {
    for &player in players {
        send_to(state, player, msg.clone());
    }
}

/// Close a session if one of its seats no longer has a live connection,
/// notifying and unseating the survivors.
///
/// Covers the ordering hole in pairing: a seat's disconnect sweep can run
/// before the session is inserted and so never sees it. `handle_disconnect`
/// removes the connection handle before its sweep, so a handle that is still
/// present here means the sweep has not started and will find the session.
pub(crate) fn close_if_vacated(state: &AppState, room_id: &str) {
    let vacated = {
        let session = match state.sessions.get(room_id) {
            Some(s) => s,
            None => return,
        };
        session
            .players
            .iter()
            .any(|p| !state.connections.contains_key(p))
    };
    if !vacated {
        return;
    }

    if let Some((_, session)) = state.sessions.remove(room_id) {
        tracing::info!(%room_id, "session closed, seat lost during pairing");
        for player in session.players {
            unseat(state, player);
            send_to(state, player, ServerMessage::OpponentDisconnected);
        }
    }
}

/// Send `gameJoined` to both seats of a freshly started session.
fn start_game(state: &AppState, room_id: &str, p1: ConnectionId, p2: ConnectionId, game: GameState) {
    send_to(
        state,
        p1,
        ServerMessage::GameJoined {
            room_id: room_id.to_string(),
            opponent_id: p2,
            is_first_player: true,
            game_state: game.clone(),
        },
    );
    send_to(
        state,
        p2,
        ServerMessage::GameJoined {
            room_id: room_id.to_string(),
            opponent_id: p1,
            is_first_player: false,
            game_state: game,
        },
    );
}
