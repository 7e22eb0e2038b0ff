use std::io::Write;

use powermeter_client::{
    backfill, BatchAdapter, Entity, EntityRef, Event, EventKind, Meter, Quantity, Service, Unit,
    Variable,
};

const SUBJECT: &str = "/user/1234/example.com/variable/electricity.1";

fn kwh(value: f64) -> Quantity {
    Quantity::new(value, Unit::KilowattHour)
}

fn example_variable(durational: bool) -> Variable {
    Variable::new(
        "1234",
        "example.com",
        "electricity.1",
        "House meter",
        "Whole-house electricity usage",
        "garage wall",
        "electricity_consumption",
        Unit::KilowattHour,
        true,
        durational,
    )
}

/// A durational meter fed register readings ends up posting one durational
/// measurement per closed interval, straight onto the wire.
#[tokio::test]
async fn test_durational_meter_posts_register_deltas() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock(
            "POST",
            "/user/1234/example.com/variable/electricity.1/durMeasurement",
        )
        .match_header("Authorization", "AuthSub token=\"test_token\"")
        .match_header("Content-Type", "application/atom+xml")
        .match_body(mockito::Matcher::AllOf(vec![
            mockito::Matcher::Regex("2009-02-13T23:31:30.000Z".to_string()),
            mockito::Matcher::Regex("2009-02-13T23:46:30.000Z".to_string()),
            mockito::Matcher::Regex("3.000000".to_string()),
        ]))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let service = Service::with_uri_prefix("test_token", server.url());
    let mut meter = Meter::new(&service, example_variable(true), kwh(0.001), 1.0, true, None);

    // Baseline reading posts nothing.
    meter
        .post_register_reading(kwh(5.0), None, Some(1234567890.0))
        .await
        .unwrap();
    // The second reading closes a 15-minute interval with a 3 kW h delta.
    meter
        .post_register_reading(kwh(8.0), None, Some(1234568790.0))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(meter.register(), kwh(8.0));
}

/// An instantaneous meter turns one interval reading into two point events.
#[tokio::test]
async fn test_instantaneous_meter_posts_interval_endpoints() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock(
            "POST",
            "/user/1234/example.com/variable/electricity.1/instMeasurement",
        )
        .with_status(200)
        .expect(2)
        .create_async()
        .await;

    let service = Service::with_uri_prefix("test_token", server.url());
    let mut meter = Meter::new(
        &service,
        example_variable(false),
        kwh(0.001),
        1.0,
        false,
        None,
    );

    meter
        .post_interval_reading(kwh(2.0), None, Some(1234567890.0), Some(1234568790.0))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(meter.register(), kwh(2.0));
}

/// A transport failure aborts the reading without advancing meter state.
#[tokio::test]
async fn test_failed_post_leaves_meter_untouched() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", mockito::Matcher::Any)
        .with_status(500)
        .create_async()
        .await;

    let service = Service::with_uri_prefix("test_token", server.url());
    let mut meter = Meter::new(
        &service,
        example_variable(false),
        kwh(0.001),
        1.0,
        false,
        None,
    );

    assert!(meter
        .post_register_reading(kwh(5.0), None, Some(1234567890.0))
        .await
        .is_err());
    assert_eq!(meter.register(), kwh(0.0));
    assert_eq!(meter.last_read_time(), None);
}

/// Events survive the trip through serialization and the flattening parser.
#[tokio::test]
async fn test_events_round_trip_through_the_wire_format() {
    let mut server = mockito::Server::new_async().await;
    let service = Service::with_uri_prefix("test_token", server.url());

    // Queue events through a batch adapter instead of posting one by one.
    let adapter = BatchAdapter::new(&service);
    let mut meter = Meter::new(&adapter, example_variable(true), kwh(0.001), 1.0, true, None);
    meter
        .post_register_reading(kwh(5.0), None, Some(1234567890.0))
        .await
        .unwrap();
    meter
        .post_register_reading(kwh(8.0), None, Some(1234568790.0))
        .await
        .unwrap();
    assert_eq!(adapter.pending(), 1);

    let posted = server
        .mock("POST", "/event")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    adapter.flush().await.unwrap();
    assert_eq!(adapter.pending(), 0);
    posted.assert_async().await;

    // Serve the same measurement back and compare it field for field.
    let original = powermeter_client::DurMeasurement::new(
        SUBJECT,
        1234567890.0,
        1234568790.0,
        kwh(3.0),
        1.0,
        1.0,
        kwh(0.002),
    );
    let feed = format!(
        "<?xml version=\"1.0\"?>\n<feed>{}</feed>",
        Event::Durational(original.clone()).to_xml().unwrap()
    );
    let _feed_mock = server
        .mock(
            "GET",
            "/user/1234/example.com/variable/electricity.1/durMeasurement",
        )
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(feed)
        .create_async()
        .await;

    let events = service
        .get_events(
            SUBJECT,
            EventKind::Durational,
            1234567000.0,
            1234569000.0,
            100,
        )
        .await
        .unwrap();
    assert_eq!(events, vec![Event::Durational(original)]);
}

/// Variables can be created locally, posted, and read back from the feed.
#[tokio::test]
async fn test_variable_round_trip() {
    let variable = example_variable(true);
    let mut server = mockito::Server::new_async().await;

    let posted = server
        .mock("POST", "/user/1234/example.com/variable")
        .match_body(mockito::Matcher::Regex(
            "<meter:variableId>electricity.1</meter:variableId>".to_string(),
        ))
        .with_status(200)
        .create_async()
        .await;
    let _feed_mock = server
        .mock("GET", SUBJECT)
        .with_status(200)
        .with_body(format!(
            "<?xml version=\"1.0\"?>\n<feed>{}</feed>",
            variable.to_xml()
        ))
        .create_async()
        .await;

    let service = Service::with_uri_prefix("test_token", server.url());
    service
        .post_entity(&Entity::Variable(variable.clone()))
        .await
        .unwrap();
    posted.assert_async().await;

    let fetched = service.get_entity(SUBJECT).await.unwrap();
    assert_eq!(fetched, Entity::Variable(variable));
}

/// The CSV front end pairs rows into durational measurements and uploads
/// them in one batch.
#[tokio::test]
async fn test_csv_backfill_batch_upload() {
    let csv_path = std::env::temp_dir().join("csv2powermeter_integration.csv");
    let mut file = std::fs::File::create(&csv_path).unwrap();
    file.write_all(
        b"ts,kwh\n\
          2009-02-13T23:00:00Z,0.0\n\
          2009-02-13T23:15:00Z,0.25\n\
          2009-02-13T23:30:00Z,0.50\n\
          2009-02-13T23:45:00Z,0.25\n",
    )
    .unwrap();

    let measurements = backfill::read_measurements(
        &csv_path,
        EntityRef::Path(SUBJECT),
        kwh(0.001),
        1.0,
    )
    .unwrap();
    assert_eq!(measurements.len(), 3);

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/event")
        .match_body(mockito::Matcher::Regex("<feed".to_string()))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let service = Service::with_uri_prefix("test_token", server.url());
    service.batch_post_events(&measurements).await.unwrap();

    mock.assert_async().await;
    std::fs::remove_file(csv_path).unwrap();
}
