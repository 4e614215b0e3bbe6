use assert_cmd::prelude::*;
use std::io::Write;
use std::net::{TcpListener, UdpSocket};
use std::process::Command;
use std::time::Duration;
use tempfile::NamedTempFile;

fn udp_sink() -> Result<(UdpSocket, u16), Box<dyn std::error::Error>> {
    let sink = UdpSocket::bind("127.0.0.1:0")?;
    sink.set_read_timeout(Some(Duration::from_secs(5)))?;
    let port = sink.local_addr()?.port();
    Ok((sink, port))
}

#[test]
fn packet_cap_ends_the_run() -> Result<(), Box<dyn std::error::Error>> {
    let (sink, port) = udp_sink()?;

    let mut cmd = Command::cargo_bin("flowgen")?;
    cmd.args(["--transport", "udp-socket", "-d", "127.0.0.1", "--port"])
        .arg(port.to_string())
        .args(["-n", "1", "-t", "uniform", "-l", "100", "-x", "10"]);
    cmd.assert().success();

    let mut buf = [0; 2048];
    for _ in 0..10 {
        assert_eq!(sink.recv(&mut buf)?, 72);
    }
    Ok(())
}

#[test]
fn invalid_flow_count() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("flowgen")?;
    cmd.args(["--transport", "udp-socket", "-n", "0", "-x", "1"]);
    cmd.assert().failure().code(1);

    let mut cmd = Command::cargo_bin("flowgen")?;
    cmd.args(["--transport", "udp-socket", "-n", "256", "-x", "1"]);
    cmd.assert().failure().code(1);
    Ok(())
}

#[test]
fn configuration_file() -> Result<(), Box<dyn std::error::Error>> {
    let (sink, port) = udp_sink()?;
    let mut file = NamedTempFile::new()?;
    writeln!(
        file,
        "dst_addr = \"127.0.0.1\"\nport = {port}\ntransport = \"udp-socket\"\nflow_count = 8\ndistribution = \"power\"\npacket_len = 64\ncount = 20\nrandomize_ports = true\nseed = 7"
    )?;

    let mut cmd = Command::cargo_bin("flowgen")?;
    cmd.arg("--config").arg(file.path());
    cmd.assert().success();

    let mut buf = [0; 2048];
    for _ in 0..20 {
        assert_eq!(sink.recv(&mut buf)?, 36);
    }
    Ok(())
}

#[test]
fn ill_formed_configuration_file() -> Result<(), Box<dyn std::error::Error>> {
    let mut file = NamedTempFile::new()?;
    writeln!(file, "flows = 3")?;
    let mut cmd = Command::cargo_bin("flowgen")?;
    cmd.arg("--config").arg(file.path());
    cmd.assert().failure().code(1);
    Ok(())
}

#[test]
fn tcp_client_and_server() -> Result<(), Box<dyn std::error::Error>> {
    // pick a free port for the server
    let port = TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();

    let mut cmd = Command::cargo_bin("flowgen")?;
    cmd.args(["--transport", "tcp", "--role", "client-server", "-d", "127.0.0.1"])
        .arg("--port")
        .arg(port.to_string())
        .args(["-n", "4", "-t", "random", "--payload-length", "512", "-x", "100"]);
    cmd.assert().success();
    Ok(())
}

#[test]
fn tcp_client_without_server() -> Result<(), Box<dyn std::error::Error>> {
    let port = TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();

    let mut cmd = Command::cargo_bin("flowgen")?;
    cmd.args(["--transport", "tcp", "-d", "127.0.0.1", "--port"])
        .arg(port.to_string())
        .args(["-n", "2", "-x", "10"]);
    cmd.assert().failure().code(1);
    Ok(())
}
