//! S6 — two handlers on the same `DataType` both see every chunk in
//! priority order; a failing second handler doesn't stop the first, and
//! the transfer's byte/chunk/error counters still conserve correctly.

use std::sync::{Arc, Mutex};

use wasmcore::transport::{DataType, TransportError, TransportRegistry};

#[test]
fn both_handlers_see_chunk_in_priority_order_despite_one_failing() {
    let registry = TransportRegistry::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let order1 = order.clone();
    registry
        .register(DataType::Firmware, 0, 0, 1, move |_, _| {
            order1.lock().unwrap().push(1);
            Ok(())
        })
        .unwrap();

    let order2 = order.clone();
    registry
        .register(DataType::Firmware, 0, 1, 2, move |_, _| {
            order2.lock().unwrap().push(2);
            Err(-5)
        })
        .unwrap();

    registry.begin(DataType::Firmware, 100, Some("fw")).unwrap();
    let result = registry.notify(DataType::Firmware, &[0u8; 100]);
    registry.end(DataType::Firmware, true).unwrap();

    assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    assert_eq!(result, Err(TransportError::HandlerFailed(-5)));

    let stats = registry.stats(Some(DataType::Firmware));
    assert_eq!(stats.total_bytes, 100);
    assert_eq!(stats.total_chunks, 1);
    assert_eq!(stats.errors, 1);
}
