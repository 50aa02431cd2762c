use async_stream::stream;
use async_trait::async_trait;
use futures::stream::Stream;
use futures::stream::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use replika_core::{Clock, CounterMap, Map, RegisterMap, Replicated, Set, Value};
use replika_entity::{
    ChannelSink, Command, CommandHandlers, DeltaSink, EntityConfig, EntityRegistry, HandlerError,
    OutgoingDelta, ReplicatedEntity, Reply, Status,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const ITEMS: &str = "items";
const TAGS: &str = "tags";
const PROFILE: &str = "profile";

const ITEM_NAMES: [&str; 6] = ["apple", "pear", "plum", "fig", "kiwi", "lime"];
const TAG_NAMES: [&str; 4] = ["gift", "express", "fragile", "bulk"];
const FIELDS: [&str; 3] = ["name", "address", "note"];

/// Statistics collected during a simulation run
#[derive(Clone, Debug)]
pub struct SimulationStats {
    pub num_replicas: usize,
    pub commands_per_replica: usize,
    pub num_entities: usize,
    pub deltas_routed: usize,
    pub total_time: Duration,
    pub commands_per_second: f64,
    pub diverged: Vec<String>,
}

impl SimulationStats {
    pub fn converged(&self) -> bool {
        self.diverged.is_empty()
    }

    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Simulation Statistics                         ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Number of Replicas:        {:>30} ║", self.num_replicas);
        println!("║  Commands per Replica:      {:>30} ║", self.commands_per_replica);
        println!("║  Entities:                  {:>30} ║", self.num_entities);
        println!("║  Deltas Routed:             {:>30} ║", self.deltas_routed);
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Commands/Second:           {:>30.0} ║", self.commands_per_second);
        println!("║  Converged:                 {:>30} ║", self.converged());
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

/// A shopping-cart entity: item counts, tags and profile fields, all of
/// which merge without coordination.
fn cart_entity(_entity_id: &str) -> Box<dyn ReplicatedEntity> {
    Box::new(
        CommandHandlers::new()
            .with_default_value(|_| {
                let mut cart = Map::new();
                cart.set(ITEMS, CounterMap::new()).ok()?;
                cart.set(TAGS, Set::new()).ok()?;
                cart.set(PROFILE, RegisterMap::new()).ok()?;
                Some(cart.into())
            })
            .on("AddItem", |command, ctx| {
                let cart = cart_mut(ctx.state_mut()?)?;
                let items = cart
                    .get_mut(&Value::from(ITEMS))
                    .and_then(Replicated::as_counter_map_mut)
                    .ok_or_else(|| HandlerError::new(Status::Internal, "cart has no items"))?;
                items.increment(command.payload.clone(), 1)?;
                Ok(Reply::NoReply)
            })
            .on("Tag", |command, ctx| {
                let cart = cart_mut(ctx.state_mut()?)?;
                let tags = cart
                    .get_mut(&Value::from(TAGS))
                    .and_then(Replicated::as_set_mut)
                    .ok_or_else(|| HandlerError::new(Status::Internal, "cart has no tags"))?;
                tags.add(command.payload.clone());
                Ok(Reply::NoReply)
            })
            .on("SetField", |command, ctx| {
                let field = command
                    .metadata
                    .get("field")
                    .cloned()
                    .ok_or_else(|| HandlerError::invalid_argument("missing field"))?;
                let cart = cart_mut(ctx.state_mut()?)?;
                let profile = cart
                    .get_mut(&Value::from(PROFILE))
                    .and_then(Replicated::as_register_map_mut)
                    .ok_or_else(|| HandlerError::new(Status::Internal, "cart has no profile"))?;
                profile.set(field, command.payload.clone(), Clock::Default)?;
                Ok(Reply::NoReply)
            })
            .on("Get", |_, ctx| {
                let cart = ctx
                    .state()
                    .and_then(Replicated::as_map)
                    .ok_or_else(|| HandlerError::new(Status::NotFound, "no cart"))?;
                Ok(Reply::message(describe(cart)))
            }),
    )
}

fn cart_mut(state: &mut Replicated) -> Result<&mut Map, HandlerError> {
    state
        .as_map_mut()
        .ok_or_else(|| HandlerError::new(Status::Internal, "cart is not a map"))
}

/// Render a cart deterministically so replicas can be compared.
fn describe(cart: &Map) -> String {
    let items = cart
        .get(&Value::from(ITEMS))
        .and_then(Replicated::as_counter_map)
        .map(|items| {
            items
                .iter()
                .map(|(item, count)| format!("{}={}", item, count))
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();
    let tags = cart
        .get(&Value::from(TAGS))
        .and_then(Replicated::as_set)
        .map(|tags| tags.iter().map(Value::to_string).collect::<Vec<_>>().join(","))
        .unwrap_or_default();
    let profile = cart
        .get(&Value::from(PROFILE))
        .and_then(Replicated::as_register_map)
        .map(|profile| {
            profile
                .iter()
                .map(|(field, value)| format!("{}={}", field, value))
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();
    format!("items[{}] tags[{}] profile[{}]", items, tags, profile)
}

/// Forwards flushed deltas to the router, counting those not yet delivered.
struct CountingSink {
    inner: ChannelSink,
    in_flight: Arc<AtomicUsize>,
}

#[async_trait]
impl DeltaSink for CountingSink {
    async fn send(&self, delta: OutgoingDelta) -> replika_entity::Result<()> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let sent = self.inner.send(delta).await;
        if sent.is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        sent
    }
}

/// Deliver everything replica `source` flushes to every other replica.
async fn route(
    source: usize,
    mut rx: mpsc::Receiver<OutgoingDelta>,
    replicas: Arc<Vec<Arc<EntityRegistry>>>,
    in_flight: Arc<AtomicUsize>,
    routed: Arc<AtomicUsize>,
) {
    while let Some(outgoing) = rx.recv().await {
        for (target, registry) in replicas.iter().enumerate() {
            if target == source {
                continue;
            }
            let delivered = if outgoing.deleted {
                registry.apply_remote_delete(&outgoing.entity_id).await
            } else if let Some(delta) = &outgoing.delta {
                registry
                    .apply_incoming(&outgoing.entity_id, delta.clone())
                    .await
            } else {
                Ok(())
            };
            if let Err(err) = delivered {
                warn!(source, target, entity_id = %outgoing.entity_id, error = %err, "delivery failed");
            }
        }
        routed.fetch_add(1, Ordering::SeqCst);
        in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Generator that yields random commands for one replica
fn command_generator(
    seed: u64,
    num_entities: usize,
    num_commands: usize,
) -> impl Stream<Item = (String, Command)> {
    stream! {
        let mut rng = StdRng::seed_from_u64(seed);
        for id in 0..num_commands {
            let entity_id = format!("cart-{}", rng.gen_range(0..num_entities));
            let id = id as u64;
            let command = match rng.gen_range(0..10) {
                0..=5 => {
                    let item = ITEM_NAMES[rng.gen_range(0..ITEM_NAMES.len())];
                    Command::new(id, "AddItem", item)
                }
                6..=7 => {
                    let tag = TAG_NAMES[rng.gen_range(0..TAG_NAMES.len())];
                    Command::new(id, "Tag", tag)
                }
                _ => {
                    let field = FIELDS[rng.gen_range(0..FIELDS.len())];
                    Command::new(id, "SetField", format!("{}-{}", field, rng.gen_range(0..100)))
                        .with_metadata("field", field)
                }
            };
            yield (entity_id, command);
        }
    }
}

/// Run `num_replicas` replicas of the cart entity type, each applying
/// `commands_per_replica` random commands while deltas flow between them,
/// then check that every replica reads the same carts.
pub async fn simulate_carts(
    num_replicas: usize,
    commands_per_replica: usize,
    num_entities: usize,
    seed: u64,
) -> SimulationStats {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Cart Replication Simulation                         ║");
    println!("║  Replicas: {} | Commands/Replica: {} | Entities: {} ║",
             num_replicas, commands_per_replica, num_entities);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let routed = Arc::new(AtomicUsize::new(0));

    let mut registries = Vec::with_capacity(num_replicas);
    let mut receivers = Vec::with_capacity(num_replicas);
    for idx in 0..num_replicas {
        let (sink, rx) = ChannelSink::channel(4096);
        let sink = CountingSink {
            inner: sink,
            in_flight: Arc::clone(&in_flight),
        };
        let config = EntityConfig::builder()
            .entity_type("cart")
            .replica_id(format!("replica-{}", idx))
            .passivation_timeout(Duration::from_millis(200))
            .build();
        registries.push(Arc::new(EntityRegistry::new(config, Arc::new(sink), cart_entity)));
        receivers.push(rx);
    }
    let replicas = Arc::new(registries);

    let mut routers = vec![];
    for (idx, rx) in receivers.into_iter().enumerate() {
        routers.push(tokio::spawn(route(
            idx,
            rx,
            Arc::clone(&replicas),
            Arc::clone(&in_flight),
            Arc::clone(&routed),
        )));
    }

    println!("\n[Phase 1/3] Running commands on every replica...");

    let mut handles = vec![];
    for (idx, registry) in replicas.iter().enumerate() {
        let registry = Arc::clone(registry);
        let handle = tokio::spawn(async move {
            let mut commands = Box::pin(command_generator(
                seed + idx as u64,
                num_entities,
                commands_per_replica,
            ));
            let mut i = 0;
            while let Some((entity_id, command)) = commands.next().await {
                match registry.send_command(&entity_id, command).await {
                    Ok(reply) if reply.is_failure() => {
                        warn!(replica = idx, %entity_id, ?reply, "command failed");
                    }
                    Ok(_) => {}
                    Err(err) => warn!(replica = idx, %entity_id, error = %err, "command rejected"),
                }
                i += 1;
                if i % 100 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        let _ = handle.await;
    }

    println!("[Phase 1/3] ✓ Completed");
    println!("[Phase 2/3] Waiting for deltas to settle...");

    while in_flight.load(Ordering::SeqCst) > 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    debug!(routed = routed.load(Ordering::SeqCst), "replication settled");

    println!("[Phase 2/3] ✓ Completed");
    println!("[Phase 3/3] Comparing replicas...");

    let mut diverged = vec![];
    for entity in 0..num_entities {
        let entity_id = format!("cart-{}", entity);
        let mut views = vec![];
        for registry in replicas.iter() {
            match registry.command(&entity_id, "Get", Value::Bool(true)).await {
                Ok(reply) => views.push(reply),
                Err(err) => views.push(Reply::from(HandlerError::from(err))),
            }
        }
        if views.windows(2).any(|pair| pair[0] != pair[1]) {
            warn!(%entity_id, ?views, "replicas diverged");
            diverged.push(entity_id);
        } else {
            info!(%entity_id, view = ?views.first(), "replicas agree");
        }
    }

    for registry in replicas.iter() {
        registry.shutdown().await;
    }
    for router in routers {
        router.abort();
    }

    let total_time = start.elapsed();
    let total_commands = num_replicas * commands_per_replica;

    println!("[Phase 3/3] ✓ Completed");

    SimulationStats {
        num_replicas,
        commands_per_replica,
        num_entities,
        deltas_routed: routed.load(Ordering::SeqCst),
        total_time,
        commands_per_second: total_commands as f64 / total_time.as_secs_f64(),
        diverged,
    }
}

/// Run simulations at growing replica counts
pub async fn simulate_scaling(max_replicas: usize, step_size: usize) -> bool {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║      Scaling Analysis - Carts vs Replicas                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut all_converged = true;
    let mut current_replicas = step_size;
    while current_replicas <= max_replicas {
        let stats = simulate_carts(current_replicas, 100, 4, current_replicas as u64).await;
        stats.print();
        all_converged &= stats.converged();
        current_replicas += step_size;
    }
    all_converged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_small_simulation_converges() {
        let stats = simulate_carts(3, 60, 3, 7).await;
        assert!(stats.converged(), "diverged: {:?}", stats.diverged);
        assert!(stats.deltas_routed > 0);
    }

    #[tokio::test]
    async fn test_command_generator_is_deterministic() {
        let first: Vec<_> = command_generator(1, 4, 20).collect().await;
        let second: Vec<_> = command_generator(1, 4, 20).collect().await;
        assert_eq!(first.len(), 20);
        assert_eq!(first, second);
    }

    #[test]
    fn test_describe_is_sorted() {
        let mut cart = Map::new();
        let mut items = CounterMap::new();
        items.increment("pear", 2).unwrap();
        items.increment("apple", 1).unwrap();
        cart.set(ITEMS, items).unwrap();
        assert_eq!(describe(&cart), "items[apple=1,pear=2] tags[] profile[]");
    }
}
