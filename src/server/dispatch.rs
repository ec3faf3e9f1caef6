//! Inbound message dispatch
//!
//! Applies message loss and per-endpoint quotas, gates each message on who
//! sent it, runs its handler against the world and wraps the answer as a
//! reply carrying the request's correlation fields.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Instant;

use tracing::{debug, error, info};

use crate::config::SimConfig;
use crate::game::classes::DEFAULT_CLASS;
use crate::game::combat::CombatSystem;
use crate::game::world::{Robot, Spectator, World};
use crate::net::codec::Envelope;
use crate::net::protocol::{Message, MessageKind};
use crate::util::rate_limit::{LossInjector, TickQuota};

/// Why a request was refused. The text is sent back as the `Error` result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("Bots that have not joined game may only send joinRequest")]
    NotJoined,

    #[error("Bot {0} is already in the game")]
    AlreadyJoined(SocketAddr),

    #[error("Game is full")]
    GameFull,

    #[error("Viewers may not join the game as a bot")]
    SpectatorCannotJoin,

    #[error("Classes are not allowed on this server")]
    ClassesDisabled,

    #[error("Unknown class {0:?}")]
    UnknownClass(String),

    #[error("Viewers are not allowed on this server")]
    ViewersDisabled,

    #[error("Bots may not join as viewers")]
    RobotCannotSpectate,

    #[error("Dead bots may only send getInfoRequest, not {0}")]
    Dead(MessageKind),

    #[error("{0} should not be sent to server")]
    NotAServerMessage(MessageKind),
}

/// Handler failures
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Answered with an `Error` reply
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// Logged and the message dropped, the client gets no answer
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HandlerResult = Result<Option<Message>, HandlerError>;

/// Handles one message kind
pub type Handler = fn(&mut World, SocketAddr, &Message) -> HandlerResult;

/// Counts from one dispatch pass
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub received: usize,
    /// Discarded by loss injection, inbound and outbound
    pub lost: usize,
    /// Discarded for exceeding the per-step quota
    pub over_quota: usize,
    pub rejected: usize,
    /// Dropped after a handler failed internally
    pub failed: usize,
    /// Replies to send, already filtered by loss injection
    pub replies: Vec<(Envelope, SocketAddr)>,
}

/// Routes messages to handlers
pub struct Dispatcher {
    handlers: BTreeMap<MessageKind, Handler>,
    loss: LossInjector,
    quota: TickQuota,
}

impl Dispatcher {
    pub fn new(conf: &SimConfig) -> Self {
        let handlers = MessageKind::ALL
            .into_iter()
            .map(|kind| (kind, handler_for(kind)))
            .collect();

        Self {
            handlers,
            loss: LossInjector::new(conf.drop_rate),
            quota: TickQuota::new(conf.bot_msgs_per_step),
        }
    }

    /// Messages discarded by loss injection since startup
    pub fn dropped(&self) -> u64 {
        self.loss.dropped()
    }

    /// Run one step's worth of inbound messages against the world
    pub fn dispatch(&mut self, world: &mut World, inbound: Vec<(Envelope, SocketAddr)>) -> DispatchReport {
        let mut report = DispatchReport {
            received: inbound.len(),
            ..DispatchReport::default()
        };
        self.quota.reset();

        for (envelope, src) in inbound {
            if self.loss.should_drop() {
                report.lost += 1;
                continue;
            }
            if !self.quota.admit(src) {
                report.over_quota += 1;
                continue;
            }

            match self.process(world, &envelope, src) {
                Ok(Some(body)) => {
                    if self.loss.should_drop() {
                        report.lost += 1;
                    } else {
                        report.replies.push((envelope.reply(body), src));
                    }
                }
                Ok(None) => {}
                Err(HandlerError::Rejected(rejection)) => {
                    report.rejected += 1;
                    debug!(%src, kind = %envelope.kind(), %rejection, "Request rejected");
                    if self.loss.should_drop() {
                        report.lost += 1;
                    } else {
                        report
                            .replies
                            .push((envelope.reply(Message::error(rejection.to_string())), src));
                    }
                }
                Err(HandlerError::Internal(reason)) => {
                    report.failed += 1;
                    error!(%src, kind = %envelope.kind(), %reason, "Handler failed, message dropped");
                }
            }
        }

        world.counters.drop_count = self.loss.dropped();
        report
    }

    /// Gate and handle a single message, without loss or quota
    pub fn process(&self, world: &mut World, envelope: &Envelope, src: SocketAddr) -> HandlerResult {
        let kind = envelope.kind();

        let open_to_all = matches!(
            kind,
            MessageKind::JoinRequest | MessageKind::AddViewerRequest | MessageKind::ViewKeepAlive
        );
        if !open_to_all {
            let Some(robot) = world.robots.get(&src) else {
                return Err(Rejection::NotJoined.into());
            };
            if kind.is_server_message() {
                return Err(Rejection::NotAServerMessage(kind).into());
            }
            if !robot.is_alive() && kind != MessageKind::GetInfoRequest {
                return Err(Rejection::Dead(kind).into());
            }
        }

        let handler = self
            .handlers
            .get(&kind)
            .ok_or_else(|| HandlerError::Internal(format!("no handler for {kind}")))?;
        let reply = handler(world, src, &envelope.body)?;

        if let Some(body) = &reply {
            if kind.reply_kind() != Some(body.kind()) {
                return Err(HandlerError::Internal(format!(
                    "{kind} answered with {}",
                    body.kind()
                )));
            }
        }
        Ok(reply)
    }
}

/// Handler for every kind; server-only kinds never reach theirs
fn handler_for(kind: MessageKind) -> Handler {
    match kind {
        MessageKind::JoinRequest => handle_join,
        MessageKind::GetInfoRequest => handle_get_info,
        MessageKind::GetLocationRequest => handle_get_location,
        MessageKind::GetSpeedRequest => handle_get_speed,
        MessageKind::SetSpeedRequest => handle_set_speed,
        MessageKind::GetDirectionRequest => handle_get_direction,
        MessageKind::SetDirectionRequest => handle_set_direction,
        MessageKind::GetCanonRequest => handle_get_canon,
        MessageKind::FireCanonRequest => handle_fire_canon,
        MessageKind::ScanRequest => handle_scan,
        MessageKind::AddViewerRequest => handle_add_viewer,
        MessageKind::ViewKeepAlive => handle_keep_alive,
        MessageKind::JoinReply
        | MessageKind::GetInfoReply
        | MessageKind::GetLocationReply
        | MessageKind::GetSpeedReply
        | MessageKind::SetSpeedReply
        | MessageKind::GetDirectionReply
        | MessageKind::SetDirectionReply
        | MessageKind::GetCanonReply
        | MessageKind::FireCanonReply
        | MessageKind::ScanReply
        | MessageKind::AddViewerReply
        | MessageKind::ViewData
        | MessageKind::Error => handle_server_message,
    }
}

fn robot_mut(world: &mut World, src: SocketAddr) -> Result<&mut Robot, HandlerError> {
    world
        .robots
        .get_mut(&src)
        .ok_or_else(|| HandlerError::Internal(format!("robot {src} vanished")))
}

fn unexpected(body: &Message) -> HandlerError {
    HandlerError::Internal(format!("handler got {}", body.kind()))
}

fn handle_server_message(_world: &mut World, _src: SocketAddr, body: &Message) -> HandlerResult {
    Err(Rejection::NotAServerMessage(body.kind()).into())
}

fn handle_join(world: &mut World, src: SocketAddr, body: &Message) -> HandlerResult {
    let Message::JoinRequest { name, class } = body else {
        return Err(unexpected(body));
    };

    if let Some(robot) = world.robots.get_mut(&src) {
        if !world.conf.allow_rejoin {
            return Err(Rejection::AlreadyJoined(src).into());
        }
        robot.name = name.clone();
        debug!(%src, name = %name, "Robot rejoined");
        return Ok(Some(Message::JoinReply {
            conf: Box::new(world.conf.clone()),
        }));
    }

    if world.spectators.contains_key(&src) {
        return Err(Rejection::SpectatorCannotJoin.into());
    }
    if world.robots.len() >= world.conf.bots_in_game as usize {
        return Err(Rejection::GameFull.into());
    }
    if let Some(class) = class {
        if class != DEFAULT_CLASS && !world.conf.allow_classes {
            return Err(Rejection::ClassesDisabled.into());
        }
        if !world.conf.classes.contains(class) {
            return Err(Rejection::UnknownClass(class.clone()).into());
        }
    }

    world.robots.insert(src, Robot::new(name.clone(), class.clone()));
    info!(
        %src,
        name = %name,
        joined = world.robots.len(),
        needed = world.conf.bots_in_game,
        "Robot joined"
    );
    Ok(Some(Message::JoinReply {
        conf: Box::new(world.conf.clone()),
    }))
}

fn handle_get_info(world: &mut World, src: SocketAddr, _body: &Message) -> HandlerResult {
    let robot = robot_mut(world, src)?;
    let health = robot.health;
    let points = robot.points;
    Ok(Some(Message::GetInfoReply {
        game_number: world.counters.game_number,
        game_step: world.counters.game_step,
        health,
        points,
    }))
}

fn handle_get_location(world: &mut World, src: SocketAddr, _body: &Message) -> HandlerResult {
    let robot = robot_mut(world, src)?;
    Ok(Some(Message::GetLocationReply {
        x: robot.x,
        y: robot.y,
    }))
}

fn handle_get_speed(world: &mut World, src: SocketAddr, _body: &Message) -> HandlerResult {
    let robot = robot_mut(world, src)?;
    Ok(Some(Message::GetSpeedReply {
        requested_speed: robot.requested_speed,
        current_speed: robot.current_speed,
    }))
}

fn handle_set_speed(world: &mut World, src: SocketAddr, body: &Message) -> HandlerResult {
    let Message::SetSpeedRequest { requested_speed } = body else {
        return Err(unexpected(body));
    };
    robot_mut(world, src)?.requested_speed = *requested_speed;
    Ok(Some(Message::SetSpeedReply {}))
}

fn handle_get_direction(world: &mut World, src: SocketAddr, _body: &Message) -> HandlerResult {
    let robot = robot_mut(world, src)?;
    Ok(Some(Message::GetDirectionReply {
        requested_direction: robot.requested_direction,
        current_direction: robot.current_direction,
    }))
}

fn handle_set_direction(world: &mut World, src: SocketAddr, body: &Message) -> HandlerResult {
    let Message::SetDirectionRequest { requested_direction } = body else {
        return Err(unexpected(body));
    };
    robot_mut(world, src)?.requested_direction = *requested_direction;
    Ok(Some(Message::SetDirectionReply {}))
}

fn handle_get_canon(world: &mut World, src: SocketAddr, _body: &Message) -> HandlerResult {
    Ok(Some(Message::GetCanonReply {
        shell_in_progress: world.shells.contains_key(&src),
    }))
}

fn handle_fire_canon(world: &mut World, src: SocketAddr, body: &Message) -> HandlerResult {
    let Message::FireCanonRequest { direction, distance } = body else {
        return Err(unexpected(body));
    };
    CombatSystem::fire(world, src, *direction, *distance);
    Ok(Some(Message::FireCanonReply {}))
}

fn handle_scan(world: &mut World, src: SocketAddr, body: &Message) -> HandlerResult {
    let Message::ScanRequest {
        start_radians,
        end_radians,
    } = body
    else {
        return Err(unexpected(body));
    };
    let distance = CombatSystem::scan(world, src, *start_radians, *end_radians);
    Ok(Some(Message::ScanReply { distance }))
}

fn handle_add_viewer(world: &mut World, src: SocketAddr, _body: &Message) -> HandlerResult {
    if world.conf.no_viewers {
        return Err(Rejection::ViewersDisabled.into());
    }
    if world.robots.contains_key(&src) {
        return Err(Rejection::RobotCannotSpectate.into());
    }

    match world.spectators.get_mut(&src) {
        Some(spectator) => spectator.last_keep_alive = Instant::now(),
        None => {
            world.spectators.insert(src, Spectator::new());
            info!(%src, viewers = world.spectators.len(), "Viewer added");
        }
    }
    Ok(Some(Message::AddViewerReply {
        conf: Box::new(world.conf.clone()),
    }))
}

fn handle_keep_alive(world: &mut World, src: SocketAddr, _body: &Message) -> HandlerResult {
    if let Some(spectator) = world.spectators.get_mut(&src) {
        spectator.last_keep_alive = Instant::now();
    }
    Ok(None)
}
