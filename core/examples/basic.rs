//! Basic circuit breaker usage example

use fuse_machines::{CircuitBreaker, KindInterpreter, ManualClock};
use std::sync::Arc;

#[derive(Debug)]
enum PaymentError {
    Timeout,
    CardDeclined,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fuse_machines=debug".into()),
        )
        .init();

    println!("=== Circuit Breaker Basic Example ===\n");

    let clock = Arc::new(ManualClock::new(0));
    let interpreter = KindInterpreter::builder()
        .kind_when(|ctx| matches!(ctx.downcast_ref::<PaymentError>(), Some(PaymentError::Timeout)))
        .frequency(2)
        .window_millis(10_000)
        .clock(clock.clone())
        .build()
        .expect("valid interpreter");

    // Create a circuit with builder API
    let circuit = CircuitBreaker::builder("payment_api")
        .reset_millis(5_000)
        .clock(clock.clone())
        .failure_interpreter(Arc::new(interpreter))
        .on_open(|name| println!("🔴 Circuit '{}' opened!", name))
        .on_close(|name| println!("🟢 Circuit '{}' closed!", name))
        .on_half_open(|name| println!("🟡 Circuit '{}' half-open, testing...", name))
        .build();

    println!("Initial state: {}\n", circuit.state_name());

    // Simulate successful calls
    println!("--- Successful calls ---");
    for i in 1..=2 {
        match circuit.invoke(move || Ok::<_, PaymentError>(format!("Payment {}", i))) {
            Ok(result) => println!("✓ {}", result),
            Err(e) => println!("✗ Error: {:?}", e),
        }
    }
    println!("State: {}\n", circuit.state_name());

    // Declined cards are the caller's problem, not the service's
    println!("--- Declined card ---");
    if let Err(e) = circuit.invoke(|| Err::<String, _>(PaymentError::CardDeclined)) {
        println!("✗ {:?}", e);
    }
    println!("State: {} (not counted)\n", circuit.state_name());

    // Simulate failures
    println!("--- Triggering timeouts ---");
    for _ in 1..=3 {
        match circuit.invoke(|| Err::<String, _>(PaymentError::Timeout)) {
            Ok(_) => println!("✓ Success"),
            Err(e) => println!("✗ {:?}", e),
        }
    }
    println!(
        "State: {} (circuit opened), status {}\n",
        circuit.state_name(),
        circuit.status()
    );

    // Try calling while open
    println!("--- Attempting call while open ---");
    match circuit.invoke(|| Ok::<_, PaymentError>("Should be rejected")) {
        Ok(_) => println!("✓ Success"),
        Err(e) => println!("✗ {}", e.rejection().map(ToString::to_string).unwrap_or_default()),
    }
    println!();

    // Let the cooldown pass and demonstrate recovery
    println!("--- After cooldown ---");
    clock.advance_millis(5_000);
    println!("Status: {}", circuit.status());
    match circuit.invoke(|| Ok::<_, PaymentError>("Payment successful")) {
        Ok(result) => println!("✓ {}", result),
        Err(e) => println!("✗ {:?}", e),
    }
    println!("State: {}\n", circuit.state_name());

    println!("--- Service status ---");
    let report = circuit.service_status();
    println!("{}: {} {:?}", report.name, report.status, report.reasons);
    println!("Trips so far: {}", circuit.trip_count());
}
