//! HTTP mirror resolver
//!
//! Resolves drive tracks against an HTTP export of the drive: a track's
//! remote `path` is appended to the configured mirror URL.

use std::time::Duration;

use anyhow::{ Context, Result };
use reqwest::blocking::{ Client, Response };
use reqwest::header::{ CONTENT_LENGTH, LAST_MODIFIED, USER_AGENT };
use reqwest::Url;

use panmusic_core::{ ResolveError, TrackReference, TrackResolver };


pub struct MirrorResolver {
    base: Url,
    client: Client,
    user_agent: String,
}


impl MirrorResolver {
    /// @param base - Mirror root, e.g. `http://nas.local/drive`
    /// @param user_agent - Sent with lookups and downloads
    /// @param timeout - Timeout for lookup requests
    pub fn new( base: &str, user_agent: &str, timeout: Duration ) -> Result<Self> {
        let base = Url::parse( base ).with_context( || format!( "invalid mirror URL: {}", base ) )?;
        if base.cannot_be_a_base() {
            anyhow::bail!( "mirror URL cannot be used as a base: {}", base );
        }

        let client = Client::builder()
            .timeout( timeout )
            .build()
            .context( "failed to build HTTP client" )?;

        Ok( Self { base, client, user_agent: user_agent.to_string() } )
    }


    /// URL of `track` on the mirror.
    pub fn url_for( &self, track: &TrackReference ) -> Result<Url, ResolveError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err( |_| ResolveError::Request( format!( "bad mirror URL {}", self.base ) ) )?
            .pop_if_empty()
            .extend( track.path.split( '/' ).filter( |s| !s.is_empty() ) );
        Ok( url )
    }


    fn head( &self, track: &TrackReference ) -> Result<Response, ResolveError> {
        let url = self.url_for( track )?;
        let response = self.client
            .head( url )
            .header( USER_AGENT, &self.user_agent )
            .send()
            .map_err( |e| ResolveError::Request( e.to_string() ) )?;

        if !response.status().is_success() {
            tracing::warn!( "Mirror lookup of {} returned {}", track.path, response.status() );
            return Err( ResolveError::NotFound( track.fs_id ) );
        }
        Ok( response )
    }
}


impl TrackResolver for MirrorResolver {
    fn is_valid( &self, track: &TrackReference ) -> bool {
        self.head( track ).is_ok()
    }


    fn refresh( &self, track: &TrackReference ) -> Option<TrackReference> {
        let response = self.head( track ).ok()?;
        let headers = response.headers();

        let mut fresh = track.clone();
        if let Some( size ) = headers.get( CONTENT_LENGTH )
            .and_then( |v| v.to_str().ok() )
            .and_then( |v| v.parse().ok() )
        {
            fresh.size = size;
        }
        if let Some( mtime ) = headers.get( LAST_MODIFIED )
            .and_then( |v| v.to_str().ok() )
            .and_then( |v| chrono::DateTime::parse_from_rfc2822( v ).ok() )
        {
            fresh.server_mtime = mtime.timestamp();
        }

        tracing::info!( "Refreshed {} ({} bytes)", fresh.server_filename, fresh.size );
        Some( fresh )
    }


    fn resolve_download_url( &self, track: &TrackReference ) -> Result<String, ResolveError> {
        Ok( self.url_for( track )?.to_string() )
    }


    fn request_headers( &self ) -> Vec<( String, String )> {
        vec![ ( USER_AGENT.as_str().to_string(), self.user_agent.clone() ) ]
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::io::{ Read, Write };
    use std::net::TcpListener;
    use std::thread;


    fn resolver( base: &str ) -> MirrorResolver {
        MirrorResolver::new( base, "pan.baidu.com", Duration::from_secs( 5 ) ).unwrap()
    }


    /// Answers one request and hands back the request text.
    fn serve_once( response: &'static str ) -> ( String, thread::JoinHandle<String> ) {
        let listener = TcpListener::bind( "127.0.0.1:0" ).unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn( move || {
            let ( mut stream, _ ) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let n = stream.read( &mut buf ).unwrap();
            stream.write_all( response.as_bytes() ).unwrap();
            String::from_utf8_lossy( &buf[ ..n ] ).into_owned()
        });
        ( format!( "http://{}/drive/", addr ), handle )
    }


    #[test]
    fn test_url_joins_and_escapes_path() {
        let track = TrackReference::new( 1, "My Song.mp3", "/music/My Song.mp3", 10 );

        let url = resolver( "http://nas.local/drive" ).url_for( &track ).unwrap();
        assert_eq!( url.as_str(), "http://nas.local/drive/music/My%20Song.mp3" );

        let url = resolver( "http://nas.local/drive/" ).url_for( &track ).unwrap();
        assert_eq!( url.as_str(), "http://nas.local/drive/music/My%20Song.mp3" );
    }


    #[test]
    fn test_rejects_invalid_base() {
        assert!( MirrorResolver::new( "not a url", "ua", Duration::from_secs( 1 ) ).is_err() );
        assert!( MirrorResolver::new( "mailto:someone@example.com", "ua", Duration::from_secs( 1 ) ).is_err() );
    }


    #[test]
    fn test_refresh_reads_headers() {
        let ( base, handle ) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 4096\r\nLast-Modified: Wed, 21 Oct 2015 07:28:00 GMT\r\nConnection: close\r\n\r\n",
        );
        let track = TrackReference::new( 3, "a.flac", "/a.flac", 1 );

        let fresh = resolver( &base ).refresh( &track ).unwrap();
        assert_eq!( fresh.fs_id, 3 );
        assert_eq!( fresh.size, 4096 );
        assert_eq!( fresh.server_mtime, 1445412480 );

        let request = handle.join().unwrap();
        assert!( request.starts_with( "HEAD /drive/a.flac" ) );
        assert!( request.to_lowercase().contains( "user-agent: pan.baidu.com" ) );
    }


    #[test]
    fn test_missing_track_is_invalid() {
        let ( base, _handle ) = serve_once( "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n" );
        let track = TrackReference::new( 4, "gone.mp3", "/gone.mp3", 1 );
        assert!( !resolver( &base ).is_valid( &track ) );
    }


    #[test]
    fn test_download_headers() {
        let headers = resolver( "http://nas.local/" ).request_headers();
        assert_eq!( headers, vec![ ( "user-agent".to_string(), "pan.baidu.com".to_string() ) ] );
    }
}
