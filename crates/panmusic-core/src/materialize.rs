//! Track materialization
//!
//! Downloads a resolved URL into a scratch file that the audio backend can
//! open. The scratch file is removed when the returned [`TempPath`] is
//! dropped or closed, and never survives a failed download.

use std::fs::File;
use std::io::{ self, Seek, SeekFrom };
use std::thread;
use std::time::Duration;

use reqwest::Url;
use tempfile::{ NamedTempFile, TempPath };
use thiserror::Error;


/// Errors that can occur while materializing a track.
#[derive( Debug, Error )]
pub enum MaterializeError {
    #[error( "Invalid URL: {0}" )]
    InvalidUrl( String ),

    #[error( "Unsupported URL scheme: {0}" )]
    UnsupportedScheme( String ),

    #[error( "IO error: {0}" )]
    Io( #[from] io::Error ),

    #[error( "HTTP client error: {0}" )]
    Client( String ),

    #[error( "Server responded with status {0}" )]
    Status( u16 ),

    #[error( "Transfer failed: {0}" )]
    Transfer( #[from] reqwest::Error ),

    #[error( "Download failed after {attempts} attempts: {last}" )]
    Exhausted { attempts: u32, last: Box<MaterializeError> },
}


impl MaterializeError {
    /// Returns true for failures worth retrying.
    fn is_transient( &self ) -> bool {
        match self {
            // A malformed request fails the same way every time
            MaterializeError::Transfer( e ) => !e.is_builder(),
            MaterializeError::Status( code ) => *code >= 500 || *code == 429,
            _ => false,
        }
    }
}


/// Retry and timeout settings for downloads.
#[derive( Debug, Clone )]
pub struct FetchPolicy {
    /// Total number of attempts, including the first.
    pub attempts: u32,
    pub backoff: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}


impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs( 1 ),
            connect_timeout: Duration::from_secs( 10 ),
            read_timeout: Duration::from_secs( 30 ),
        }
    }
}


/// Downloads `url` into a new scratch file ending in `.{extension}`.
///
/// @param url - Direct-access URL (`http`, `https` or `file`)
/// @param headers - Extra request headers
/// @param extension - File extension without the dot, used so decoders can probe by name
/// @param policy - Retry and timeout settings
///
/// @returns Path of the scratch file
pub fn materialize(
    url: &str,
    headers: &[( String, String )],
    extension: Option<&str>,
    policy: &FetchPolicy,
) -> Result<TempPath, MaterializeError> {
    let parsed = Url::parse( url ).map_err( |e| MaterializeError::InvalidUrl( format!( "{}: {}", url, e ) ) )?;
    let mut scratch = scratch_file( extension )?;

    match parsed.scheme() {
        "file" => copy_local( &parsed, scratch.as_file_mut() )?,
        "http" | "https" => download( parsed, headers, policy, scratch.as_file_mut() )?,
        other => return Err( MaterializeError::UnsupportedScheme( other.to_string() ) ),
    }

    scratch.as_file().sync_all()?;
    tracing::debug!( "Materialized {} to {:?}", url, scratch.path() );
    Ok( scratch.into_temp_path() )
}


fn scratch_file( extension: Option<&str> ) -> Result<NamedTempFile, MaterializeError> {
    let suffix = extension.map( |e| format!( ".{}", e ) ).unwrap_or_default();
    Ok( tempfile::Builder::new()
        .prefix( "panmusic-" )
        .suffix( &suffix )
        .tempfile()? )
}


fn copy_local( url: &Url, dest: &mut File ) -> Result<(), MaterializeError> {
    let path = url.to_file_path()
        .map_err( |_| MaterializeError::InvalidUrl( url.to_string() ) )?;
    let mut source = File::open( path )?;
    io::copy( &mut source, dest )?;
    Ok(())
}


fn download(
    url: Url,
    headers: &[( String, String )],
    policy: &FetchPolicy,
    dest: &mut File,
) -> Result<(), MaterializeError> {
    let client = reqwest::blocking::Client::builder()
        .connect_timeout( policy.connect_timeout )
        .timeout( policy.read_timeout )
        .build()
        .map_err( |e| MaterializeError::Client( e.to_string() ) )?;

    let attempts = policy.attempts.max( 1 );
    let mut attempt = 1;

    loop {
        match fetch_once( &client, &url, headers, dest ) {
            Ok( bytes ) => {
                tracing::info!( "Downloaded {} bytes from {}", bytes, url.host_str().unwrap_or( "" ) );
                return Ok(());
            }
            Err( e ) if e.is_transient() && attempt < attempts => {
                tracing::warn!( "Download attempt {}/{} failed: {}; retrying", attempt, attempts, e );
                thread::sleep( policy.backoff );
                attempt += 1;
            }
            Err( e ) if e.is_transient() => {
                return Err( MaterializeError::Exhausted { attempts, last: Box::new( e ) } );
            }
            Err( e ) => return Err( e ),
        }
    }
}


fn fetch_once(
    client: &reqwest::blocking::Client,
    url: &Url,
    headers: &[( String, String )],
    dest: &mut File,
) -> Result<u64, MaterializeError> {
    // A retry must not append to a partial body
    dest.set_len( 0 )?;
    dest.seek( SeekFrom::Start( 0 ) )?;

    let mut request = client.get( url.clone() );
    for ( name, value ) in headers {
        request = request.header( name.as_str(), value.as_str() );
    }

    let mut response = request.send()?;
    let status = response.status();
    if !status.is_success() {
        return Err( MaterializeError::Status( status.as_u16() ) );
    }

    Ok( response.copy_to( dest )? )
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::io::{ Read, Write };
    use std::net::TcpListener;


    fn file_url( path: &std::path::Path ) -> String {
        Url::from_file_path( path ).unwrap().to_string()
    }


    /// Serves `responses` in order, one per connection.
    fn serve( responses: Vec<&'static str> ) -> String {
        let listener = TcpListener::bind( "127.0.0.1:0" ).unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn( move || {
            for response in responses {
                let ( mut stream, _ ) = listener.accept().unwrap();
                let mut buf = [0u8; 4096];
                let _ = stream.read( &mut buf );
                stream.write_all( response.as_bytes() ).unwrap();
            }
        });
        format!( "http://{}/song.mp3", addr )
    }


    fn fast_policy() -> FetchPolicy {
        FetchPolicy {
            attempts: 3,
            backoff: Duration::from_millis( 10 ),
            connect_timeout: Duration::from_secs( 2 ),
            read_timeout: Duration::from_secs( 5 ),
        }
    }


    #[test]
    fn test_materialize_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join( "source.mp3" );
        std::fs::write( &source, b"ID3 fake audio" ).unwrap();

        let path = materialize( &file_url( &source ), &[], Some( "mp3" ), &fast_policy() ).unwrap();
        assert!( path.to_string_lossy().ends_with( ".mp3" ) );
        assert_eq!( std::fs::read( &path ).unwrap(), b"ID3 fake audio" );

        let kept = path.to_path_buf();
        path.close().unwrap();
        assert!( !kept.exists() );
    }


    #[test]
    fn test_missing_local_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = materialize( &file_url( &dir.path().join( "nope.mp3" ) ), &[], Some( "mp3" ), &fast_policy() );
        assert!( matches!( result, Err( MaterializeError::Io( _ ) ) ) );
    }


    #[test]
    fn test_rejects_unknown_scheme() {
        let result = materialize( "ftp://example.com/a.mp3", &[], None, &fast_policy() );
        assert!( matches!( result, Err( MaterializeError::UnsupportedScheme( _ ) ) ) );
    }


    #[test]
    fn test_http_retries_server_errors() {
        let url = serve( vec![
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        ]);

        let path = materialize( &url, &[ ( "User-Agent".into(), "pan.baidu.com".into() ) ], Some( "mp3" ), &fast_policy() ).unwrap();
        assert_eq!( std::fs::read( &path ).unwrap(), b"hello" );
    }


    #[test]
    fn test_http_client_error_is_not_retried() {
        let url = serve( vec![
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ]);

        let result = materialize( &url, &[], Some( "mp3" ), &fast_policy() );
        assert!( matches!( result, Err( MaterializeError::Status( 404 ) ) ) );
    }


    #[test]
    fn test_malformed_header_is_not_retried() {
        let policy = FetchPolicy { backoff: Duration::from_secs( 5 ), ..fast_policy() };
        let started = std::time::Instant::now();

        let result = materialize(
            "http://127.0.0.1:9/song.mp3",
            &[ ( "bad header".into(), "x".into() ) ],
            Some( "mp3" ),
            &policy,
        );
        assert!( matches!( result, Err( MaterializeError::Transfer( ref e ) ) if e.is_builder() ) );
        assert!( started.elapsed() < Duration::from_secs( 5 ) );
    }


    #[test]
    fn test_http_gives_up_after_attempts() {
        let url = serve( vec![
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ]);

        let result = materialize( &url, &[], Some( "mp3" ), &fast_policy() );
        assert!( matches!( result, Err( MaterializeError::Exhausted { attempts: 3, .. } ) ) );
    }
}
