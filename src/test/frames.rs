use super::*;
use crate::prelude::checksum::crc16;
use crate::prelude::*;

// ---------------------------------------------------------------------------
// Client request construction
// ---------------------------------------------------------------------------

#[test]
fn read_coils_request_from_a_bit_mask() {
    let mut client = TestRegister::new(0);
    client.start_rtu_frame(1).expect("start");
    let frame = client
        .get_frame_read_bits(TestCoils::c() | TestCoils::g())
        .expect("build");
    assert_eq!(frame, &[1, 1, 0, 22, 0, 5, 29, 205]);
}

#[test]
fn read_discrete_inputs_request_from_a_single_bit() {
    let mut client = TestRegister::new(0);
    client.start_rtu_frame(1).expect("start");
    let frame = client
        .get_frame_read_bits(TestWriteCoils::x())
        .expect("build");
    assert_eq!(frame, &[1, 2, 0, 33, 0, 1, 233, 192]);
}

#[test]
fn bit_masks_reject_more_than_two_set_bits() {
    let mut client = TestRegister::new(0);
    client.start_rtu_frame(1).expect("start");
    let mask = TestCoils::a() | TestCoils::b() | TestCoils::c();
    assert_eq!(
        client.get_frame_read_bits(mask),
        Err(Error::ExactlyOneOrTwoBitsInStartBit)
    );
}

#[test]
fn write_single_coil_request_echo_validated() {
    let mut client = TestRegister::new(0);
    client.set_bit(TestWriteCoils::z(), true);
    client.start_rtu_frame(233).expect("start");
    let frame = client
        .get_frame_write_bits(TestWriteCoils::z())
        .expect("build")
        .to_vec();
    assert_eq!(frame, vec![233, 5, 0, 35, 255, 0, 106, 216]);

    // The buffer still holds the finished request.
    assert_eq!(client.process_rtu(frame[0]), Err(Error::NoWriteInFinalState));

    client.switch_to_response();
    feed_rtu(&mut client, &frame);
}

#[test]
fn write_multiple_coils_packs_low_bit_first() {
    let mut client = TestRegister::new(0);
    for mask in [
        TestWriteCoils::a(),
        TestWriteCoils::c(),
        TestWriteCoils::d(),
        TestWriteCoils::e(),
        TestWriteCoils::f(),
        TestWriteCoils::i(),
        TestWriteCoils::z(),
    ] {
        client.set_bit(mask, true);
    }

    client.start_rtu_frame(134).expect("start");
    let frame = client
        .get_frame_write_bits(TestWriteCoils::a() | TestWriteCoils::z())
        .expect("build");
    assert_eq!(frame, &[134, 15, 0, 10, 0, 26, 4, 61, 1, 0, 2, 47, 182]);

    // Same span shifted to start at bit 2: payload re-aligns.
    client.start_rtu_frame(134).expect("start");
    let frame = client
        .get_frame_write_bits(TestWriteCoils::c() | TestWriteCoils::z())
        .expect("build");
    assert_eq!(frame, &[134, 15, 0, 12, 0, 24, 3, 79, 0, 128, 10, 49]);
}

#[test]
fn write_requests_refuse_read_only_spaces() {
    let mut client = TestRegister::new(0);
    client.start_rtu_frame(2).expect("start");
    assert_eq!(
        client.get_frame_write(TestHalfs::r1()),
        Err(Error::HalfsNotAllowed)
    );
    client.start_rtu_frame(2).expect("start");
    assert_eq!(
        client.get_frame_write_bits(TestCoils::a()),
        Err(Error::BitsNotAllowed)
    );
}

#[test]
fn builders_demand_a_started_frame() {
    let mut client = TestRegister::new(0);
    assert_eq!(
        client.get_frame_read(TestHalfs::r1()),
        Err(Error::StateNotWriteFc)
    );
}

#[test]
fn range_reads_demand_one_sub_aggregate() {
    let mut client = TestRegister::new(0);
    client.start_rtu_frame(1).expect("start");
    assert_eq!(
        client.get_frame_read_range(TestHalfs::r1(), TestWriteHalfs::r2()),
        Err(Error::RegistersNotInSameSpace)
    );
}

// ---------------------------------------------------------------------------
// Client response ingestion
// ---------------------------------------------------------------------------

#[test]
fn read_holding_registers_round_trip() {
    let mut client = TestRegister::new(0);
    client.start_rtu_frame(1).expect("start");
    let frame = client
        .get_frame_read_range(TestHalfs::r1(), TestHalfs::r2())
        .expect("build");
    assert_eq!(frame, &[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xc4, 0x0b]);

    let response = [0x01, 0x03, 0x04, 0x00, 0x06, 0x00, 0x05, 0xda, 0x31];

    // Corrupted checksum.
    client.switch_to_response();
    for &byte in &response[..response.len() - 1] {
        assert_eq!(client.process_rtu(byte), Ok(Status::InProgress));
    }
    assert_eq!(client.process_rtu(0x20), Err(Error::InvalidCrc));

    // Valid checksum, wrong byte count for a two-register read.
    client.switch_to_response();
    let short = [0x01, 0x03, 0x02, 0x00, 0x06];
    for &byte in &short {
        assert_eq!(client.process_rtu(byte), Ok(Status::InProgress));
    }
    let crc = crc16(client.current_frame());
    assert_eq!(
        client.process_rtu(low_byte(crc)),
        Ok(Status::InProgress)
    );
    assert_eq!(
        client.process_rtu(high_byte(crc)),
        Err(Error::ResponseFromServerInvalid)
    );

    // The genuine response lands in the layout.
    client.switch_to_response();
    feed_rtu(&mut client, &response);
    assert_eq!(client.read(TestHalfs::r1()), 6);
    assert_eq!(client.read(TestHalfs::r2()), 5);
}

#[test]
fn read_input_register_overwrites_local_value() {
    let mut client = TestRegister::new(0);
    client.write(44u16, TestWriteHalfs::r1());
    client.start_rtu_frame(1).expect("start");
    let frame = client.get_frame_read(TestWriteHalfs::r1()).expect("build");
    assert_eq!(frame, &[0x01, 0x04, 0x00, 0x00, 0x00, 0x01, 49, 202]);

    client.switch_to_response();
    feed_rtu(&mut client, &[0x01, 0x04, 0x02, 0x00, 0x00, 0xb9, 0x30]);
    assert_eq!(client.read(TestWriteHalfs::r1()), 0);
}

#[test]
fn write_single_register_validates_the_echo() {
    let mut client = TestRegister::new(0);
    client.write(3u16, TestWriteHalfs::r1());
    client.start_rtu_frame(17).expect("start");
    let request = client
        .get_frame_write(TestWriteHalfs::r1())
        .expect("build")
        .to_vec();
    assert_eq!(request, vec![0x11, 0x06, 0x00, 0x00, 0x00, 0x03, 203, 91]);

    // Corrupted checksum.
    client.switch_to_response();
    for &byte in &request[..request.len() - 1] {
        assert_eq!(client.process_rtu(byte), Ok(Status::InProgress));
    }
    assert_eq!(client.process_rtu(16), Err(Error::InvalidCrc));

    // Valid frame that does not echo the request.
    let bad_echo = [0x11, 0x06, 0x00, 0x00, 0x00, 42, 10, 133];
    for &byte in &bad_echo[..bad_echo.len() - 1] {
        assert_eq!(client.process_rtu(byte), Ok(Status::InProgress));
    }
    assert_eq!(
        client.process_rtu(bad_echo[bad_echo.len() - 1]),
        Err(Error::ResponseFromServerInvalid)
    );

    // The true echo.
    feed_rtu(&mut client, &request);
}

#[test]
fn write_multiple_registers_carries_count_then_byte_count() {
    let mut client = TestRegister::new(0);
    client.write(6u16, TestWriteHalfs::r1());
    client.write(5u16, TestWriteHalfs::r2());
    client.start_rtu_frame(1).expect("start");
    let frame = client
        .get_frame_write_range(TestWriteHalfs::r1(), TestWriteHalfs::r2())
        .expect("build");
    assert_eq!(frame, &[1, 16, 0, 0, 0, 2, 4, 0, 6, 0, 5, 211, 173]);

    client.switch_to_response();
    feed_rtu(&mut client, &[1, 16, 0, 0, 0, 2, 65, 200]);
}

#[test]
fn exception_responses_fail_validation() {
    let mut client = TestRegister::new(0);
    client.start_rtu_frame(1).expect("start");
    client
        .get_frame_read_range(TestHalfs::r1(), TestHalfs::r2())
        .expect("build");

    client.switch_to_response();
    let exception = [1, 0x83, 2, 192, 241];
    for &byte in &exception[..exception.len() - 1] {
        assert_eq!(client.process_rtu(byte), Ok(Status::InProgress));
    }
    assert_eq!(
        client.process_rtu(exception[exception.len() - 1]),
        Err(Error::ResponseFromServerInvalid)
    );
}

// ---------------------------------------------------------------------------
// Server request handling
// ---------------------------------------------------------------------------

fn coil_server() -> TestRegister {
    let mut server = TestRegister::new(1);
    for mask in [
        TestCoils::a(),
        TestCoils::c(),
        TestCoils::d(),
        TestCoils::e(),
        TestCoils::f(),
        TestCoils::i(),
    ] {
        server.set_bit(mask, true);
    }
    for mask in [
        TestWriteCoils::b(),
        TestWriteCoils::c(),
        TestWriteCoils::d(),
        TestWriteCoils::f(),
        TestWriteCoils::i(),
    ] {
        server.set_bit(mask, true);
    }
    server
}

#[test]
fn server_answers_read_coils() {
    let mut server = coil_server();
    let mut client = TestRegister::new(0);

    client.start_rtu_frame(1).expect("start");
    let request = client
        .get_frame_read_bits(TestCoils::b() | TestCoils::f())
        .expect("build")
        .to_vec();
    feed_rtu(&mut server, &request);
    let response = server.get_frame_response().expect("respond");
    assert_eq!(response, &[1, 1, 1, 30, 209, 128]);
}

#[test]
fn server_answers_read_discrete_inputs_and_client_mirrors_them() {
    let mut server = coil_server();
    let mut client = TestRegister::new(0);

    client.start_rtu_frame(1).expect("start");
    let request = client
        .get_frame_read_bits(TestWriteCoils::b() | TestWriteCoils::f())
        .expect("build")
        .to_vec();
    feed_rtu(&mut server, &request);
    let response = server.get_frame_response().expect("respond").to_vec();
    assert_eq!(response, vec![1, 2, 1, 23, 225, 134]);

    client.switch_to_response();
    feed_rtu(&mut client, &response);
    for mask in [
        TestWriteCoils::a(),
        TestWriteCoils::b(),
        TestWriteCoils::c(),
        TestWriteCoils::d(),
        TestWriteCoils::e(),
        TestWriteCoils::f(),
    ] {
        assert_eq!(client.get_bit(mask), server.get_bit(mask));
    }
    // Bit i sits outside the requested span and stays untouched locally.
    assert!(server.get_bit(TestWriteCoils::i()));
    assert!(!client.get_bit(TestWriteCoils::i()));
}

#[test]
fn server_drops_requests_for_other_units() {
    let mut server = TestRegister::new(1);
    let mut client = TestRegister::new(0);

    client.start_rtu_frame(31).expect("start");
    let request = client
        .get_frame_read_range(TestHalfs::r3(), TestHalfs::r4())
        .expect("build")
        .to_vec();
    for &byte in &request[..request.len() - 1] {
        assert_eq!(server.process_rtu(byte), Ok(Status::InProgress));
    }
    assert_eq!(
        server.process_rtu(request[request.len() - 1]),
        Err(Error::WrongAddr)
    );
}

#[test]
fn server_answers_read_holding_registers() {
    let mut server = TestRegister::new(1);
    server.write(5u16, TestHalfs::r3());
    server.write(6u16, TestHalfs::r4());
    let mut client = TestRegister::new(0);

    client.start_rtu_frame(1).expect("start");
    let request = client
        .get_frame_read_range(TestHalfs::r3(), TestHalfs::r4())
        .expect("build")
        .to_vec();
    feed_rtu(&mut server, &request);
    assert_eq!(
        server.get_frame_response().expect("respond"),
        &[1, 3, 4, 0, 5, 0, 6, 106, 48]
    );
}

#[test]
fn server_answers_read_input_registers() {
    let mut server = TestRegister::new(1);
    server.write(6u16, TestWriteHalfs::r3());
    server.write(2u16, TestWriteHalfs::r4());
    let mut client = TestRegister::new(0);

    client.start_rtu_frame(1).expect("start");
    let request = client
        .get_frame_read_range(TestWriteHalfs::r1(), TestWriteHalfs::r4())
        .expect("build")
        .to_vec();
    feed_rtu(&mut server, &request);
    assert_eq!(
        server.get_frame_response().expect("respond"),
        &[1, 4, 8, 0, 0, 0, 0, 0, 6, 0, 2, 69, 205]
    );
}

#[test]
fn server_applies_write_single_register_and_echoes() {
    let mut server = TestRegister::new(1);
    let request = [1, 6, 0, 1, 0x12, 0x34, 213, 125];
    feed_rtu(&mut server, &request);
    let response = server.get_frame_response().expect("respond");
    assert_eq!(response, &request);
    assert_eq!(server.read(TestWriteHalfs::r2()), 0x1234);
}

#[test]
fn server_applies_write_single_coil_and_echoes() {
    let mut server = TestRegister::new(1);
    assert!(!server.get_bit(TestWriteCoils::c()));

    let request = [1, 5, 0, 12, 0xff, 0, 76, 57];
    feed_rtu(&mut server, &request);
    let response = server.get_frame_response().expect("respond");
    assert_eq!(response, &request);
    assert!(server.get_bit(TestWriteCoils::c()));

    // 0x0000 clears the coil again.
    server.switch_to_request();
    let clear = {
        let mut frame = [1u8, 5, 0, 12, 0x00, 0, 0, 0];
        let crc = crc16(&frame[..6]);
        frame[6] = low_byte(crc);
        frame[7] = high_byte(crc);
        frame
    };
    feed_rtu(&mut server, &clear);
    server.get_frame_response().expect("respond");
    assert!(!server.get_bit(TestWriteCoils::c()));
}

#[test]
fn server_unpacks_write_multiple_coils_into_the_coil_space() {
    let mut server = TestRegister::new(1);
    // Coils 21 and 22: bits b and c of the coil block at offset 20.
    let request = [1, 15, 0, 21, 0, 2, 1, 3, 147, 85];
    feed_rtu(&mut server, &request);
    let response = server.get_frame_response().expect("respond");
    assert_eq!(response, &[1, 15, 0, 21, 0, 2, 197, 206]);
    assert!(server.get_bit(TestCoils::b()));
    assert!(server.get_bit(TestCoils::c()));
    assert!(!server.get_bit(TestCoils::a()));
    assert!(!server.get_bit(TestCoils::d()));
}

#[test]
fn server_applies_write_multiple_registers_and_echoes_the_header() {
    let mut server = TestRegister::new(1);
    let request = [1, 16, 0, 2, 0, 2, 4, 0, 7, 0, 8, 194, 113];
    feed_rtu(&mut server, &request);
    let response = server.get_frame_response().expect("respond");
    assert_eq!(response, &[1, 16, 0, 2, 0, 2, 224, 8]);
    assert_eq!(server.read(TestWriteHalfs::r3()), 7);
    assert_eq!(server.read(TestWriteHalfs::r4()), 8);
}

#[test]
fn uncovered_reads_turn_into_illegal_address_exceptions() {
    let mut server = TestRegister::new(1);
    // Registers 3..=4; register 4 is past the declared block.
    let request = [1, 3, 0, 3, 0, 2, 52, 11];
    feed_rtu(&mut server, &request);
    let error = server.get_frame_response().expect_err("out of range");
    assert_eq!(error, Error::RegisterNotFullyCovered);
    assert_eq!(
        server.get_frame_error_response(error).expect("exception"),
        &[1, 0x83, 2, 192, 241]
    );
}

#[test]
fn uncovered_coil_writes_turn_into_illegal_address_exceptions() {
    let mut server = TestRegister::new(1);
    let mut client = TestRegister::new(0);

    // A span taken from the writable-bit block lands below the coil
    // block's offset on this layout.
    client.start_rtu_frame(1).expect("start");
    let request = client
        .get_frame_write_bits(TestWriteCoils::a() | TestWriteCoils::z())
        .expect("build")
        .to_vec();
    assert_eq!(request, vec![1, 15, 0, 10, 0, 26, 4, 0, 0, 0, 0, 65, 173]);

    feed_rtu(&mut server, &request);
    let error = server.get_frame_response().expect_err("not covered");
    assert_eq!(error, Error::BitsNotFullyCovered);
    assert_eq!(
        server.get_frame_error_response(error).expect("exception"),
        &[1, 0x8f, 2, 197, 241]
    );
}

// ---------------------------------------------------------------------------
// TCP framing
// ---------------------------------------------------------------------------

#[test]
fn tcp_read_round_trip() {
    let mut client = TestRegister::new(0);
    let mut server = TestRegister::new(1);
    server.write(0x1805u16, TestHalfs::r4());

    client.start_tcp_frame(10, 1).expect("start");
    let request = client
        .get_frame_read(TestHalfs::r4())
        .expect("build")
        .to_vec();
    assert_eq!(request, vec![0, 10, 0, 0, 0, 6, 1, 3, 0, 3, 0, 1]);

    feed_tcp(&mut server, &request);
    let response = server.get_frame_response().expect("respond").to_vec();
    assert_eq!(response, vec![0, 10, 0, 0, 0, 5, 1, 3, 2, 24, 5]);

    client.switch_to_response();
    feed_tcp(&mut client, &response);
    assert_eq!(client.read(TestHalfs::r4()), 0x1805);
}

#[test]
fn tcp_frames_cannot_outgrow_their_advertised_length() {
    let mut server = TestRegister::new(1);
    // Length claims two post-header bytes; the PDU needs more.
    for byte in [0, 1, 0, 0, 0, 2] {
        assert_eq!(server.process_tcp(byte), Ok(Status::InProgress));
    }
    assert_eq!(server.process_tcp(1), Ok(Status::InProgress));
    assert_eq!(server.process_tcp(3), Ok(Status::InProgress));
    assert_eq!(server.process_tcp(0), Ok(Status::InProgress));
    assert_eq!(server.process_tcp(0), Err(Error::FatalTcpFrameLengthFull));
}

#[test]
fn tcp_bytes_into_an_rtu_parse_are_fatal() {
    let mut server = TestRegister::new(1);
    assert_eq!(server.process_rtu(1), Ok(Status::InProgress));
    assert_eq!(
        server.process_tcp(3),
        Err(Error::FatalMissingTcpHeaderInFrame)
    );
    // The failure reset the parse; a fresh frame starts clean.
    assert!(server.frame().is_empty());
}

// ---------------------------------------------------------------------------
// ASCII stays reserved
// ---------------------------------------------------------------------------

#[test]
fn ascii_paths_report_not_implemented() {
    let mut client = TestRegister::new(0);
    assert_eq!(client.process_ascii(b':'), Err(Error::NotImplemented));
    client.start_ascii_frame(1).expect("start byte and addr fit");
    assert_eq!(
        client.get_frame_read(TestHalfs::r1()),
        Err(Error::NotImplemented)
    );
}
